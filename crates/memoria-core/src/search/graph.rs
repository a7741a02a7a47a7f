//! Entity-graph hop signal: observations reachable from a query's matched
//! entities within a small hop distance get a boost in fusion, the same
//! way a citation graph surfaces related-but-unworded-alike documents.
//! Traversal itself is breadth-first over an adjacency map the caller
//! builds from the `relations` table — this module stays ignorant of
//! storage, mirroring the relation/traversal split in `PulseDB`'s
//! `relation` module.

use std::collections::{HashMap, HashSet, VecDeque};

pub const DEFAULT_MAX_HOPS: u8 = 2;

/// Adjacency: entity id -> observation ids that evidence a relation
/// touching that entity, plus entity id -> neighboring entity ids.
pub struct EntityGraph<'a> {
    pub entity_neighbors: &'a HashMap<String, Vec<String>>,
    pub entity_observations: &'a HashMap<String, Vec<String>>,
}

/// Breadth-first search from `seed_entities` out to `max_hops`, collecting
/// every observation evidenced by an entity visited along the way. Returns
/// `(observation_id, hop_distance)` pairs, closest first; an observation
/// reachable via multiple paths keeps its shortest distance. A distance of
/// `0` never appears in the result for un-evidenced seeds — only entities
/// that evidence at least one observation contribute.
pub fn hop_search(graph: &EntityGraph<'_>, seed_entities: &[String], max_hops: u8) -> Vec<(String, u8)> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<(String, u8)> = VecDeque::new();
    let mut best_distance: HashMap<String, u8> = HashMap::new();

    for entity in seed_entities {
        if visited.insert(entity.clone()) {
            queue.push_back((entity.clone(), 0));
        }
    }

    while let Some((entity_id, distance)) = queue.pop_front() {
        if let Some(observations) = graph.entity_observations.get(&entity_id) {
            for obs_id in observations {
                best_distance.entry(obs_id.clone()).and_modify(|d| *d = (*d).min(distance)).or_insert(distance);
            }
        }

        if distance >= max_hops {
            continue;
        }

        if let Some(neighbors) = graph.entity_neighbors.get(&entity_id) {
            for neighbor in neighbors {
                if visited.insert(neighbor.clone()) {
                    queue.push_back((neighbor.clone(), distance + 1));
                }
            }
        }
    }

    let mut results: Vec<(String, u8)> = best_distance.into_iter().collect();
    results.sort_by_key(|(_, distance)| *distance);
    results
}

/// Converts hop distances into the `(id, score)` shape fusion expects:
/// closer hops score higher, normalized to `(0, 1]`.
pub fn hop_results_to_ranked(hops: &[(String, u8)], max_hops: u8) -> Vec<(String, f32)> {
    hops.iter()
        .map(|(id, distance)| {
            let score = 1.0 - (*distance as f32 / (max_hops as f32 + 1.0));
            (id.clone(), score)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_fixture() -> (HashMap<String, Vec<String>>, HashMap<String, Vec<String>>) {
        let mut neighbors = HashMap::new();
        neighbors.insert("entity-a".to_string(), vec!["entity-b".to_string()]);
        neighbors.insert("entity-b".to_string(), vec!["entity-a".to_string(), "entity-c".to_string()]);

        let mut observations = HashMap::new();
        observations.insert("entity-a".to_string(), vec!["obs-1".to_string()]);
        observations.insert("entity-b".to_string(), vec!["obs-2".to_string()]);
        observations.insert("entity-c".to_string(), vec!["obs-3".to_string()]);

        (neighbors, observations)
    }

    #[test]
    fn direct_entity_observation_is_distance_zero() {
        let (neighbors, observations) = graph_fixture();
        let graph = EntityGraph { entity_neighbors: &neighbors, entity_observations: &observations };
        let hops = hop_search(&graph, &["entity-a".to_string()], DEFAULT_MAX_HOPS);
        assert_eq!(hops.iter().find(|(id, _)| id == "obs-1").unwrap().1, 0);
    }

    #[test]
    fn two_hop_neighbor_is_found_within_max_hops() {
        let (neighbors, observations) = graph_fixture();
        let graph = EntityGraph { entity_neighbors: &neighbors, entity_observations: &observations };
        let hops = hop_search(&graph, &["entity-a".to_string()], DEFAULT_MAX_HOPS);
        assert!(hops.iter().any(|(id, _)| id == "obs-3"));
    }

    #[test]
    fn hop_limit_excludes_distant_observations() {
        let (neighbors, observations) = graph_fixture();
        let graph = EntityGraph { entity_neighbors: &neighbors, entity_observations: &observations };
        let hops = hop_search(&graph, &["entity-a".to_string()], 0);
        assert!(!hops.iter().any(|(id, _)| id == "obs-3"));
    }

    #[test]
    fn scores_decrease_with_distance() {
        let hops = vec![("near".to_string(), 0), ("far".to_string(), 2)];
        let ranked = hop_results_to_ranked(&hops, DEFAULT_MAX_HOPS);
        let near_score = ranked.iter().find(|(id, _)| id == "near").unwrap().1;
        let far_score = ranked.iter().find(|(id, _)| id == "far").unwrap().1;
        assert!(near_score > far_score);
    }
}
