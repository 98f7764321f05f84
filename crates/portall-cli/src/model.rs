//! The Portall data model.

use portall_core::catalog::{ColumnDef, ColumnType, DefaultValue, ModelSchema, TableSchema};

/// Tables the Portall application expects.
pub fn portall_model() -> ModelSchema {
    ModelSchema::new().with_table(port_table()).with_table(setting_table())
}

/// Tracked ports, grouped by host IP.
fn port_table() -> TableSchema {
    TableSchema::new("port")
        .with_column(ColumnDef::primary("id"))
        .with_column(ColumnDef::new("ip_address", ColumnType::Text))
        .with_column(ColumnDef::optional("nickname", ColumnType::Text))
        .with_column(ColumnDef::new("port_number", ColumnType::Integer))
        .with_column(ColumnDef::new("description", ColumnType::Text))
        .with_column(
            ColumnDef::new("port_protocol", ColumnType::Text)
                .with_default(DefaultValue::String("TCP".to_string())),
        )
        .with_column(ColumnDef::new("order", ColumnType::Integer).with_default(DefaultValue::Int(0)))
}

/// Key/value application settings.
fn setting_table() -> TableSchema {
    TableSchema::new("setting")
        .with_column(ColumnDef::primary("id"))
        .with_column(ColumnDef::new("key", ColumnType::Text).unique())
        .with_column(ColumnDef::new("value", ColumnType::Text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use portall_core::engine::{LiveDatabase, SqliteDatabase};
    use portall_core::Dialect;

    #[test]
    fn test_model_tables() {
        let model = portall_model();
        assert_eq!(model.table_names().collect::<Vec<_>>(), vec!["port", "setting"]);
        let port = model.get_table("port").unwrap();
        assert_eq!(port.columns.len(), 7);
        assert!(port.get_column("nickname").unwrap().nullable);
    }

    #[test]
    fn test_model_creates_on_sqlite() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let statements: Vec<String> = portall_model()
            .tables
            .values()
            .map(|t| t.create_sql(Dialect::Sqlite))
            .collect();
        db.execute_in_transaction(&statements).unwrap();

        db.execute("INSERT INTO port (ip_address, port_number, description) VALUES ('10.0.0.1', 80, 'web')")
            .unwrap();
        assert_eq!(
            db.query_strings("SELECT port_protocol, \"order\" FROM port").unwrap(),
            vec![vec![Some("TCP".to_string()), Some("0".to_string())]]
        );
    }
}
