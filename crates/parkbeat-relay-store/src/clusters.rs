use std::collections::BTreeMap;

use parkbeat_relay_types::{GEOHASH_PRECISION, Project, ProjectCluster};

/// Cells holding at least this many projects collapse into one cluster marker.
const MIN_CLUSTER_SIZE: usize = 3;

/// Splits a snapshot query result into individually rendered projects and
/// aggregated distant clusters. Projects are grouped one geohash character
/// deeper than the subscribed prefix; dense cells become `{geohash, count,
/// centroid}` markers. Ordering is deterministic (cell key, then project id).
pub fn cluster_snapshot(
    prefix: &str,
    mut projects: Vec<Project>,
) -> (Vec<Project>, Vec<ProjectCluster>) {
    let cell_len = (prefix.len() + 1).min(GEOHASH_PRECISION);
    let mut cells: BTreeMap<String, Vec<Project>> = BTreeMap::new();
    for project in projects.drain(..) {
        let cell = project
            .geohash
            .get(..cell_len)
            .unwrap_or(&project.geohash)
            .to_string();
        cells.entry(cell).or_default().push(project);
    }

    let mut singles = Vec::new();
    let mut clusters = Vec::new();
    for (cell, mut members) in cells {
        if members.len() >= MIN_CLUSTER_SIZE {
            let count = members.len() as u64;
            let lat = members.iter().map(|p| p.lat).sum::<f64>() / members.len() as f64;
            let lng = members.iter().map(|p| p.lng).sum::<f64>() / members.len() as f64;
            clusters.push(ProjectCluster {
                geohash: cell,
                count,
                lat,
                lng,
            });
        } else {
            members.sort_by(|a, b| a.id.cmp(&b.id));
            singles.extend(members);
        }
    }
    (singles, clusters)
}
