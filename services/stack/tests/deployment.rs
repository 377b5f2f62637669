//! End-to-end evaluation of the Eneftea deployment against an in-memory
//! network inventory.

use eneftea_infra::cdn::PathRewrite;
use eneftea_infra::compute::ENVIRONMENT_KEYS;
use eneftea_infra::engine::{apply, ResourceStatus};
use eneftea_infra::load_balancer::{ListenerProtocol, RouteOutcome};
use eneftea_infra::network::{HostedZone, SecurityGroupRecord, Subnet, Vpc, DEFAULT_SECURITY_GROUP};
use eneftea_infra::{
    ConfigError, DeployReport, Deployment, LookupError, RecordingEngine, StackConfig, StackError,
    StackResult, StackTemplate, StaticInventory,
};

fn config() -> StackConfig {
    StackConfig::from_pairs([
        ("AWS_PROFILE", "eneftea"),
        ("DOMAIN", "api.eneftea.com"),
        ("CDN_DOMAIN", "cdn.eneftea.com"),
        ("API_IMAGE", "registry.example.com/eneftea/api:2.0.0"),
        ("API_MEMORY", "2048"),
        ("API_CPU", "1024"),
        ("MOLECULER_NAMESPACE", "staging"),
        ("REDIS_URL", "redis://redis:6379"),
        ("KAFKA_URL", "kafka:9092"),
        ("DATABASE_URL", "postgres://db/eneftea"),
        ("IPFS_GATEWAY", "https://ipfs.example.com"),
        ("S3_KEY_ID", "AKIATEST"),
        ("S3_SECRET_ACCESS_KEY", "test-secret"),
    ])
}

fn inventory() -> StaticInventory {
    let vpc = "vpc-1234";
    StaticInventory {
        vpcs: vec![Vpc {
            id: vpc.to_string(),
            is_default: true,
            cidr_block: None,
        }],
        subnets: ["a", "b", "c"]
            .iter()
            .map(|z| Subnet {
                id: format!("subnet-{}", z),
                vpc_id: vpc.to_string(),
                availability_zone: format!("eu-west-2{}", z),
            })
            .collect(),
        security_groups: vec![SecurityGroupRecord {
            id: "sg-1234".to_string(),
            name: DEFAULT_SECURITY_GROUP.to_string(),
            vpc_id: vpc.to_string(),
        }],
        hosted_zones: vec![HostedZone {
            id: "ZTEST".to_string(),
            name: "api.eneftea.com".to_string(),
        }],
    }
}

async fn deployment() -> Deployment {
    Deployment::compose(&config(), &inventory()).await.unwrap()
}

/// Evaluate, then apply only when evaluation succeeded, as the CLI does
async fn compose_and_apply(
    config: &StackConfig,
    inventory: &StaticInventory,
    engine: &RecordingEngine,
) -> StackResult<DeployReport> {
    let deployment = Deployment::compose(config, inventory).await?;
    apply(&deployment.graph, engine).await
}

#[tokio::test]
async fn test_missing_profile_declares_nothing() {
    let mut config = config();
    config.remove("AWS_PROFILE");
    let engine = RecordingEngine::new();

    let result = compose_and_apply(&config, &inventory(), &engine).await;

    assert!(matches!(
        result,
        Err(StackError::Config(ConfigError::Missing(ref keys))) if keys == &["AWS_PROFILE"]
    ));
    assert_eq!(engine.calls(), 0);
}

#[tokio::test]
async fn test_complete_config_reaches_the_engine() {
    let engine = RecordingEngine::new();

    let report = compose_and_apply(&config(), &inventory(), &engine).await.unwrap();

    assert!(report.is_success());
    assert_eq!(engine.calls(), report.outcomes.len());
    assert!(engine.calls() > 0);
}

#[tokio::test]
async fn test_two_default_vpcs_fail_evaluation() {
    let mut inventory = inventory();
    inventory.vpcs.push(Vpc {
        id: "vpc-5678".to_string(),
        is_default: true,
        cidr_block: None,
    });

    let err = Deployment::compose(&config(), &inventory).await.unwrap_err();
    assert!(matches!(
        err,
        StackError::Lookup(LookupError::Ambiguous { count: 2, .. })
    ));
}

#[tokio::test]
async fn test_plain_http_always_redirects() {
    let deployment = deployment().await;
    let http = deployment.load_balancer.routing.listener(ListenerProtocol::Http);

    for path in ["/", "/api/health", "/anything/else?x=1"] {
        assert_eq!(
            http.handle("api.eneftea.com", path),
            RouteOutcome::Redirected {
                status_code: 301,
                location: format!("https://api.eneftea.com:443{}", path),
            }
        );
    }
}

#[tokio::test]
async fn test_https_forwards_only_api_paths() {
    let deployment = deployment().await;
    let https = deployment.load_balancer.routing.listener(ListenerProtocol::Https);

    assert!(matches!(
        https.handle("api.eneftea.com", "/api/tokens"),
        RouteOutcome::Forwarded { .. }
    ));
    assert!(matches!(
        https.handle("api.eneftea.com", "/"),
        RouteOutcome::Fixed { status_code: 404, .. }
    ));
    assert!(matches!(
        https.handle("api.eneftea.com", "/apiv2"),
        RouteOutcome::Fixed { status_code: 404, .. }
    ));
}

#[tokio::test]
async fn test_cdn_strips_bucket_prefix_once() {
    let deployment = deployment().await;
    let behaviors = &deployment.cdn.behaviors;

    let request = behaviors.origin_request("/nft-media/nft-media/a.png");
    assert_eq!(request.origin_id, "nft-media-cdn-s3");
    assert_eq!(request.path, "/nft-media/a.png");

    let fallback = behaviors.origin_request("/favicon.ico");
    assert_eq!(fallback.behavior, "*");
    assert_eq!(fallback.path, "/favicon.ico");

    let rewrite = PathRewrite::strip_bucket_prefix("nft-media");
    let once = rewrite.rewrite("/nft-media/a.png").into_owned();
    assert_eq!(rewrite.rewrite(&once), once);
}

#[tokio::test]
async fn test_task_environment_keys_are_fixed() {
    let deployment = deployment().await;
    let names: Vec<&str> = deployment
        .compute
        .environment
        .iter()
        .map(|v| v.name.as_str())
        .collect();
    assert_eq!(names, ENVIRONMENT_KEYS);

    let task = deployment.graph.get("eneftea-svc-task").unwrap();
    let container = &task.properties["containerDefinitions"][0];
    assert_eq!(container["image"], "registry.example.com/eneftea/api:2.0.0");
    assert_eq!(container["environment"][0]["value"], "staging");
}

#[tokio::test]
async fn test_dry_run_apply_creates_everything() {
    let deployment = deployment().await;
    let engine = RecordingEngine::new();

    let report = apply(&deployment.graph, &engine).await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.created(), deployment.graph.len());
    assert_eq!(engine.calls(), deployment.graph.len());

    // every intrinsic was resolved before reaching the engine
    for call in engine.recorded().await {
        let text = call.properties.to_string();
        assert!(!text.contains("\"Ref\""), "{} has unresolved refs", call.name);
        assert!(!text.contains("Fn::GetAtt"), "{} has unresolved attributes", call.name);
    }
}

#[tokio::test]
async fn test_failed_load_balancer_skips_its_dependents() {
    let deployment = deployment().await;
    let engine = RecordingEngine::new().fail_on("eneftea-lb", "quota exceeded");

    let report = apply(&deployment.graph, &engine).await.unwrap();

    assert!(!report.is_success());
    assert_eq!(
        report.outcome("eneftea-lb").unwrap().status,
        ResourceStatus::Failed {
            message: "quota exceeded".to_string()
        }
    );
    for dependent in deployment.graph.transitive_dependents("eneftea-lb") {
        assert_eq!(
            report.outcome(&dependent).unwrap().status,
            ResourceStatus::Skipped {
                predecessor: "eneftea-lb".to_string()
            },
            "{}",
            dependent
        );
    }
    // independent branches still go ahead
    assert_eq!(report.outcome("cdn-cf").unwrap().status, ResourceStatus::Created);
    assert_eq!(report.outcome("ssmRole").unwrap().status, ResourceStatus::Created);
}

#[tokio::test]
async fn test_template_renders_every_resource() {
    let deployment = deployment().await;
    let template =
        StackTemplate::render(&deployment.graph, "Eneftea", &deployment.exports()).unwrap();

    assert_eq!(template.resources.len(), deployment.graph.len());
    assert_eq!(template.version, "2010-09-09");
    assert!(template.resources.contains_key("EnefteaSvc"));
    assert!(template.outputs.contains_key("LoadBalancerDnsName"));

    let service = &template.resources["EnefteaSvc"];
    assert!(service.depends_on.contains(&"ApiTg".to_string()));
}
