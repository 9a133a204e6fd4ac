use kavach::config::GatewayConfig;
use kavach::driver::memory::{row, MemoryGraph};
use kavach::driver::ParamMap;
use kavach::gateway::ExecutionGateway;
use kavach::schema::GraphSchema;
use kavach::tool::ToolRegistry;
use serde_json::json;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    println!("Kavach Query Gateway v{}", kavach::version());
    println!("==========================================");
    println!();

    let gateway = Arc::new(ExecutionGateway::new(
        Arc::new(sample_backend()),
        GatewayConfig {
            allow_adhoc: true,
            ..GatewayConfig::default()
        },
    ));

    demo_templates(&gateway).await?;
    demo_validation(&gateway).await;
    demo_tools(gateway).await;

    Ok(())
}

/// Fixture backend standing in for a live graph database.
fn sample_backend() -> MemoryGraph {
    MemoryGraph::builder()
        .schema(GraphSchema {
            labels: vec!["Learner".into(), "Course".into(), "Country".into()],
            relationship_types: vec!["ENROLLED_IN".into(), "LOCATED_IN".into()],
            property_keys: vec!["name".into(), "title".into(), "code".into()],
        })
        .fixture(
            "count(l) AS learners",
            vec![
                row(&[("country", json!("India")), ("learners", json!(125_000))]),
                row(&[("country", json!("Brazil")), ("learners", json!(98_400))]),
                row(&[("country", json!("Kenya")), ("learners", json!(61_250))]),
            ],
        )
        .fixture(
            "count(l) AS enrollments",
            vec![
                row(&[("course", json!("Intro to Graphs")), ("enrollments", json!(18_402))]),
                row(&[("course", json!("Applied Statistics")), ("enrollments", json!(15_977))]),
            ],
        )
        .fixture(
            "RETURN l",
            vec![
                row(&[("l", json!({"name": "Asha"}))]),
                row(&[("l", json!({"name": "Bruno"}))]),
            ],
        )
        .build()
}

async fn demo_templates(gateway: &ExecutionGateway) -> anyhow::Result<()> {
    println!("=== Demo 1: Analytic Templates ===");

    let result = gateway
        .run_template("get_top_countries_by_learners", &ParamMap::new())
        .await?;
    println!(
        "get_top_countries_by_learners → {} rows in {}ms (truncated: {})",
        result.row_count, result.elapsed_ms, result.truncated
    );
    for r in &result.rows {
        println!("  {:?}", r);
    }

    // identical call within the TTL window is served from cache
    let cached = gateway
        .run_template("get_top_countries_by_learners", &ParamMap::new())
        .await?;
    println!("repeat call → cache_hit: {}", cached.cache_hit);
    println!();
    Ok(())
}

async fn demo_validation(gateway: &ExecutionGateway) {
    println!("=== Demo 2: Ad-hoc Validation ===");

    for query in [
        "MATCH (l:Learner) RETURN l",
        "MATCH (n) DETACH DELETE n",
        "MATCH (n) RETURN n; MATCH (m) RETURN m",
        "CALL dbms.shutdown()",
    ] {
        match gateway.run_adhoc(query, &ParamMap::new()).await {
            Ok(result) => println!(
                "ALLOW  {:55} → {} rows",
                query, result.row_count
            ),
            Err(error) => println!("DENY   {:55} → {}", query, error),
        }
    }
    println!();
}

async fn demo_tools(gateway: Arc<ExecutionGateway>) {
    println!("=== Demo 3: Tool Contract ===");

    let registry = ToolRegistry::for_gateway(gateway);
    println!("registered tools: {:?}", registry.names());

    let out = registry
        .invoke(
            "run_template",
            json!({"template": "get_popular_courses", "params": {"limit": 5}}),
        )
        .await;
    println!("run_template → ok: {}", out["ok"]);

    let out = registry
        .invoke("run_query", json!({"query": "MATCH (n) SET n.x = 1"}))
        .await;
    println!(
        "run_query (write) → ok: {}, error_kind: {}",
        out["ok"], out["error_kind"]
    );
}
