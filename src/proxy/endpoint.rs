// src/proxy/endpoint.rs
use crate::registry::{BackendDescriptor, Endpoint};

/// Pick the endpoint authoritative for `path` by longest matching prefix;
/// ties go to the endpoint that appears earlier in the list (spec §4.7).
/// Falls back to the backend's first endpoint if nothing matches.
pub fn select_endpoint<'a>(desc: &'a BackendDescriptor, path: &str) -> &'a Endpoint {
    desc.endpoints
        .iter()
        .enumerate()
        .filter_map(|(i, ep)| {
            ep.path_prefixes
                .iter()
                .filter(|prefix| path.starts_with(prefix.as_str()))
                .map(|prefix| prefix.len())
                .max()
                .map(|len| (len, std::cmp::Reverse(i), ep))
        })
        .max_by_key(|(len, rev_i, _)| (*len, *rev_i))
        .map(|(_, _, ep)| ep)
        .unwrap_or(&desc.endpoints[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Capacity, GeoPoint};
    use chrono::Utc;

    fn desc(endpoints: Vec<Endpoint>) -> BackendDescriptor {
        BackendDescriptor {
            id: "b1".to_string(),
            hostname: "h".to_string(),
            address: "127.0.0.1:1".to_string(),
            location: GeoPoint {
                latitude: 0.0,
                longitude: 0.0,
            },
            capacity: Capacity {
                vcpu: 1,
                memory_gb: 1.0,
                storage_gb: 1.0,
                gpu_count: 0,
                gpu_memory_gb: 0.0,
                gpu_models: vec![],
            },
            endpoints,
            registered_at: Utc::now(),
            last_seen: Utc::now(),
        }
    }

    fn ep(url: &str, prefixes: &[&str]) -> Endpoint {
        Endpoint {
            url: url.parse().unwrap(),
            path_prefixes: prefixes.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn longest_prefix_wins() {
        let d = desc(vec![
            ep("http://a:9000", &["/"]),
            ep("http://b:9000", &["/v1/infer"]),
        ]);
        let chosen = select_endpoint(&d, "/v1/infer/chat");
        assert_eq!(chosen.url.host_str(), Some("b"));
    }

    #[test]
    fn ties_favor_earlier_endpoint() {
        let d = desc(vec![
            ep("http://a:9000", &["/v1"]),
            ep("http://b:9000", &["/v1"]),
        ]);
        let chosen = select_endpoint(&d, "/v1/infer");
        assert_eq!(chosen.url.host_str(), Some("a"));
    }

    #[test]
    fn falls_back_to_first_endpoint_when_nothing_matches() {
        let d = desc(vec![ep("http://a:9000", &["/v1"]), ep("http://b:9000", &["/v2"])]);
        let chosen = select_endpoint(&d, "/unmatched");
        assert_eq!(chosen.url.host_str(), Some("a"));
    }
}
