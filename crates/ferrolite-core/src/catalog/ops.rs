//! Validation of table and index definitions.

use std::collections::HashSet;

use crate::error::ValidationError;
use crate::types::{
    IndexConsistency, IndexDefinition, IndexKind, KeyDefinition, MAX_GLOBAL_INDEXES,
    MAX_LOCAL_INDEXES, ProjectionType, TableDefinition,
};

/// Table and index names: 3-255 characters of `[A-Za-z0-9_.-]`.
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    let valid_len = (3..=255).contains(&name.len());
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !valid_len || !valid_chars {
        return Err(ValidationError::InvalidTableName(name.to_string()));
    }
    Ok(())
}

fn validate_key_definition(def: &KeyDefinition) -> Result<(), ValidationError> {
    if def.name.is_empty() || def.name.len() > 255 {
        return Err(ValidationError::InvalidParameter(format!(
            "key attribute name '{}' must be 1-255 bytes",
            def.name
        )));
    }
    Ok(())
}

/// Check one index against its table.
pub fn validate_index(
    index: &IndexDefinition,
    table: &TableDefinition,
) -> Result<(), ValidationError> {
    let bad = |why: &str| ValidationError::InvalidIndex(format!("{}: {why}", index.index_name));
    validate_name(&index.index_name).map_err(|_| bad("invalid index name"))?;
    validate_key_definition(&index.partition_key)?;
    if let Some(sk) = &index.sort_key {
        validate_key_definition(sk)?;
        if sk.name == index.partition_key.name {
            return Err(bad("partition and sort key must differ"));
        }
    }

    // A key attribute shared with the table must keep the table's type.
    for def in std::iter::once(&index.partition_key).chain(index.sort_key.as_ref()) {
        let table_keys = std::iter::once(&table.partition_key).chain(table.sort_key.as_ref());
        for table_key in table_keys {
            if table_key.name == def.name && table_key.key_type != def.key_type {
                return Err(bad("key attribute type conflicts with the table key"));
            }
        }
    }

    if index.kind == IndexKind::Local {
        if table.sort_key.is_none() {
            return Err(bad("local indexes require a table with a sort key"));
        }
        if index.partition_key != table.partition_key {
            return Err(bad("local index partition key must equal the table partition key"));
        }
        if index.sort_key.is_none() {
            return Err(bad("local index requires a sort key"));
        }
        if index.consistency == IndexConsistency::Eventual {
            return Err(bad("local indexes are always strongly consistent"));
        }
        if index.provisioned_throughput.is_some() {
            return Err(bad("local indexes share the table's throughput"));
        }
    }

    let projection = &index.projection;
    match projection.projection_type {
        ProjectionType::Include if projection.non_key_attributes.is_empty() => {
            return Err(bad("INCLUDE projection requires non-key attributes"));
        }
        ProjectionType::All | ProjectionType::KeysOnly
            if !projection.non_key_attributes.is_empty() =>
        {
            return Err(bad("non-key attributes are only allowed with INCLUDE"));
        }
        _ => {}
    }
    Ok(())
}

/// Check a whole table definition before creation.
pub fn validate_definition(def: &TableDefinition) -> Result<(), ValidationError> {
    validate_name(&def.table_name)?;
    validate_key_definition(&def.partition_key)?;
    if let Some(sk) = &def.sort_key {
        validate_key_definition(sk)?;
        if sk.name == def.partition_key.name {
            return Err(ValidationError::InvalidParameter(
                "partition and sort key must differ".into(),
            ));
        }
    }
    if let Some(tp) = &def.provisioned_throughput
        && (tp.read_capacity_units == 0 || tp.write_capacity_units == 0)
    {
        return Err(ValidationError::InvalidParameter(
            "provisioned capacity units must be at least 1".into(),
        ));
    }

    let mut names = HashSet::new();
    let (mut global, mut local) = (0, 0);
    for index in &def.indexes {
        if !names.insert(index.index_name.as_str()) {
            return Err(ValidationError::InvalidIndex(format!(
                "duplicate index name '{}'",
                index.index_name
            )));
        }
        match index.kind {
            IndexKind::Global => global += 1,
            IndexKind::Local => local += 1,
        }
        validate_index(index, def)?;
    }
    if global > MAX_GLOBAL_INDEXES || local > MAX_LOCAL_INDEXES {
        return Err(ValidationError::InvalidIndex(format!(
            "at most {MAX_GLOBAL_INDEXES} global and {MAX_LOCAL_INDEXES} local indexes are allowed"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{KeyType, Projection};

    fn table() -> TableDefinition {
        TableDefinition {
            table_name: "orders".into(),
            partition_key: KeyDefinition::new("customer", KeyType::String),
            sort_key: Some(KeyDefinition::new("order_id", KeyType::String)),
            indexes: vec![],
            provisioned_throughput: None,
        }
    }

    fn gsi(name: &str) -> IndexDefinition {
        IndexDefinition {
            index_name: name.into(),
            kind: IndexKind::Global,
            partition_key: KeyDefinition::new("status", KeyType::String),
            sort_key: None,
            projection: Projection::default(),
            consistency: IndexConsistency::Strong,
            provisioned_throughput: None,
        }
    }

    #[test]
    fn test_names() {
        assert!(validate_name("users").is_ok());
        assert!(validate_name("my-table_v1.0").is_ok());
        assert!(validate_name("ab").is_err());
        assert!(validate_name("has space").is_err());
        assert!(validate_name(&"x".repeat(256)).is_err());
    }

    #[test]
    fn test_duplicate_index_names() {
        let mut def = table();
        def.indexes = vec![gsi("by_status"), gsi("by_status")];
        assert!(matches!(
            validate_definition(&def),
            Err(ValidationError::InvalidIndex(_))
        ));
    }

    #[test]
    fn test_local_index_rules() {
        let mut lsi = gsi("by_date");
        lsi.kind = IndexKind::Local;
        lsi.sort_key = Some(KeyDefinition::new("date", KeyType::String));
        // Partition key differs from the table's.
        assert!(validate_index(&lsi, &table()).is_err());

        lsi.partition_key = table().partition_key;
        assert!(validate_index(&lsi, &table()).is_ok());

        lsi.consistency = IndexConsistency::Eventual;
        assert!(validate_index(&lsi, &table()).is_err());
    }

    #[test]
    fn test_index_type_conflict() {
        let mut idx = gsi("by_customer");
        idx.partition_key = KeyDefinition::new("customer", KeyType::Number);
        assert!(validate_index(&idx, &table()).is_err());
    }

    #[test]
    fn test_include_projection_needs_attributes() {
        let mut idx = gsi("by_status");
        idx.projection.projection_type = ProjectionType::Include;
        assert!(validate_index(&idx, &table()).is_err());
        idx.projection.non_key_attributes = vec!["total".into()];
        assert!(validate_index(&idx, &table()).is_ok());
    }
}
