use std::collections::BTreeMap;

use crate::logic::query::NamedQuery;
use crate::model::{AttributeDef, DataType, EntityDefinition, FieldValue};
use crate::store::traits::EntityStore;

/// Demo schema used by the default server configuration and the test suites.
pub fn demo_definitions() -> Vec<EntityDefinition> {
    vec![
        EntityDefinition::new(
            "Person",
            vec![
                AttributeDef::required_scalar("name", DataType::String),
                AttributeDef::scalar("age", DataType::Number),
                AttributeDef::to_one("bestFriend", "Person"),
                AttributeDef::to_many("pets", "Pet"),
            ],
        ),
        EntityDefinition::new(
            "Pet",
            vec![
                AttributeDef::required_scalar("name", DataType::String),
                AttributeDef::to_one("owner", "Person"),
            ],
        ),
    ]
}

pub fn demo_named_queries() -> Vec<NamedQuery> {
    vec![
        NamedQuery::new("peopleByAge", "Person", &["age"]),
        NamedQuery::new("peopleByName", "Person", &["name"]),
    ]
}

/// Optional demo data, loaded when the seed flag is set in configuration.
pub async fn load_demo_data<S: EntityStore + ?Sized>(store: &S) -> anyhow::Result<()> {
    let mut tx = store.begin().await?;

    let mut fields = BTreeMap::new();
    fields.insert(
        "name".to_string(),
        FieldValue::Scalar(serde_json::json!("Ann")),
    );
    fields.insert("age".to_string(), FieldValue::Scalar(serde_json::json!(34)));
    let ann = tx.create("Person", fields).await?;

    let mut fields = BTreeMap::new();
    fields.insert(
        "name".to_string(),
        FieldValue::Scalar(serde_json::json!("Rex")),
    );
    fields.insert("owner".to_string(), FieldValue::Ref(Some(ann.entity_ref())));
    tx.create("Pet", fields).await?;

    tx.commit().await?;
    Ok(())
}
