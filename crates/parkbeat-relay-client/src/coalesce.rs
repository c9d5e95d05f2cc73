use parkbeat_relay_types::events::ClientEvent;
use serde_json::Value;

/// How an emit interacts with entries already sitting in the delayed queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArgBehavior {
    #[default]
    Append,
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmitTiming {
    #[default]
    Immediate,
    Delayed,
}

#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    pub arg_behavior: ArgBehavior,
    pub timing: EmitTiming,
    /// Payload field used to match queued entries for `Replace`.
    pub unique_key: Option<String>,
}

impl EmitOptions {
    pub fn immediate() -> Self {
        EmitOptions::default()
    }

    pub fn delayed() -> Self {
        EmitOptions {
            timing: EmitTiming::Delayed,
            ..EmitOptions::default()
        }
    }

    pub fn replace_keyed(unique_key: impl Into<String>) -> Self {
        EmitOptions {
            arg_behavior: ArgBehavior::Replace,
            timing: EmitTiming::Delayed,
            unique_key: Some(unique_key.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuedEmit {
    pub event: ClientEvent,
    pub options: EmitOptions,
}

/// The per-kind delayed queue. Entries wait out the flush window together;
/// `Replace` with a `uniqueKey` lets a later emit overwrite (or annihilate)
/// a queued one before anything reaches the wire.
#[derive(Debug, Default)]
pub struct EmitQueue {
    entries: Vec<QueuedEmit>,
}

impl EmitQueue {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn push(&mut self, event: ClientEvent, options: EmitOptions) {
        if options.arg_behavior == ArgBehavior::Replace {
            let matched = self.entries.iter().position(|queued| {
                queued.event.kind() == event.kind()
                    && match &options.unique_key {
                        Some(key) => unique_key_matches(&queued.event, &event, key),
                        None => true,
                    }
            });
            if let Some(index) = matched {
                let queued = self.entries.remove(index);
                if cancels_out(&queued.event, &event) {
                    // subscribe followed by its own unsubscribe: both vanish
                    return;
                }
                self.entries.insert(index, QueuedEmit { event, options });
                return;
            }
        }
        self.entries.push(QueuedEmit { event, options });
    }

    pub fn drain(&mut self) -> Vec<QueuedEmit> {
        std::mem::take(&mut self.entries)
    }
}

fn payload(event: &ClientEvent) -> Option<Value> {
    serde_json::to_value(event).ok().map(|mut frame| {
        frame
            .as_object_mut()
            .and_then(|fields| fields.remove("data"))
            .unwrap_or(Value::Null)
    })
}

fn unique_key_matches(queued: &ClientEvent, incoming: &ClientEvent, key: &str) -> bool {
    match (payload(queued), payload(incoming)) {
        (Some(a), Some(b)) => {
            let (a, b) = (a.get(key), b.get(key));
            a.is_some() && a == b
        }
        _ => false,
    }
}

/// Two queued payloads that differ only in an opposite `shouldSubscribe`
/// cancel each other.
fn cancels_out(queued: &ClientEvent, incoming: &ClientEvent) -> bool {
    let (Some(Value::Object(mut a)), Some(Value::Object(mut b))) =
        (payload(queued), payload(incoming))
    else {
        return false;
    };
    match (a.remove("shouldSubscribe"), b.remove("shouldSubscribe")) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x != y && a == b,
        _ => false,
    }
}
