//! DNS alias records

use serde_json::json;

use crate::error::GraphError;
use crate::graph::{ResourceDescriptor, ResourceHandle, ResourceKind, StackGraph};
use crate::provider::ProviderBinding;

/// `A` alias record named `domain` pointing at `target`'s generated DNS
/// name. `name_attr` and `zone_attr` are the target's output attributes
/// holding its DNS name and hosted zone id.
pub fn declare_alias_record(
    graph: &mut StackGraph,
    provider: &ProviderBinding,
    domain: &str,
    zone_id: &str,
    target: &ResourceHandle,
    name_attr: &str,
    zone_attr: &str,
) -> Result<ResourceHandle, GraphError> {
    graph.declare(
        ResourceDescriptor::new(
            domain,
            ResourceKind::DnsRecord,
            provider,
            json!({
                "name": domain,
                "zoneId": zone_id,
                "type": "A",
                "aliases": [{
                    "name": target.attr(name_attr),
                    "zoneId": target.attr(zone_attr),
                    "evaluateTargetHealth": true,
                }],
            }),
        )
        .depends_on(target),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::attr;

    #[test]
    fn test_alias_references_target_outputs() {
        let provider = ProviderBinding::new("eu-west-2", "eneftea");
        let mut graph = StackGraph::new();
        let lb = graph
            .declare(ResourceDescriptor::new(
                "eneftea-lb",
                ResourceKind::LoadBalancer,
                &provider,
                json!({}),
            ))
            .unwrap();

        let alias = declare_alias_record(
            &mut graph,
            &provider,
            "api.eneftea.com",
            "Z0123456789",
            &lb,
            attr::DNS_NAME,
            attr::ZONE_ID,
        )
        .unwrap();

        let record = graph.get(&alias.name).unwrap();
        assert_eq!(record.properties["type"], "A");
        assert_eq!(
            record.properties["aliases"][0]["name"],
            json!({"Fn::GetAtt": ["eneftea-lb", "DnsName"]})
        );
        assert_eq!(record.properties["aliases"][0]["evaluateTargetHealth"], true);
    }
}
