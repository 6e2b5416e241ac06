use courseware_state::{
    CourseKey, FieldMap, SResult, Scope, StoreBackedClient, StoreConfig, UserStateClient,
    open_record_store,
};
use serde_json::json;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> SResult<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courseware_state=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // COURSEWARE_STATE_BACKEND=redis REDIS_URL=redis://... selects the Redis backend.
    let config = StoreConfig::from_env()?;
    let store = open_record_store(&config)?;
    let client = StoreBackedClient::new("learner", store);

    let course = CourseKey::new("edX", "DemoX", "2024")?;
    let problem = course.make_usage_key("problem", "checkpoint")?;

    let mut answers = FieldMap::new();
    answers.insert("attempts".to_owned(), json!(1));
    answers.insert("student_answers".to_owned(), json!({"q1": "42"}));
    client.set("learner", &problem, answers, Scope::UserState)?;

    let mut done = FieldMap::new();
    done.insert("done".to_owned(), json!(true));
    client.set("learner", &problem, done, Scope::UserState)?;

    let state = client.get("learner", &problem, Scope::UserState, None)?;
    println!("state of {problem}: {}", serde_json::Value::Object(state));

    for (field, modified) in client.get_mod_date("learner", &problem, Scope::UserState, None)? {
        println!("{field} last modified {modified}");
    }

    client.delete("learner", &problem, Scope::UserState, Some(["attempts"].as_slice()))?;
    let state = client.get("learner", &problem, Scope::UserState, None)?;
    println!("after deleting attempts: {}", serde_json::Value::Object(state));

    Ok(())
}
