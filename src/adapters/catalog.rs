use crate::adapters::ddl;
use crate::domain::ports::{Catalog, Storage};
use crate::domain::table::{ColumnDef, PartitionEntry, TableDefinition};
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;

const CATALOG_PREFIX: &str = "_catalog";

/// Table metastore kept as one JSON document per table inside the warehouse storage.
///
/// Every change rewrites the table document with a single `write_file`, so a partition is
/// either fully registered or not at all. The matching Athena DDL is logged at debug level
/// for anyone replaying the change against a real metastore.
#[derive(Debug, Clone)]
pub struct FileCatalog<S: Storage> {
    storage: S,
}

impl<S: Storage> FileCatalog<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    fn table_path(database: &str, table: &str) -> String {
        format!("{}/{}/{}.json", CATALOG_PREFIX, database, table)
    }

    async fn save(&self, definition: &TableDefinition) -> Result<()> {
        let data = serde_json::to_vec_pretty(definition)?;
        self.storage
            .write_file(&Self::table_path(&definition.database, &definition.name), &data)
            .await
    }

    /// Logs the Athena statements that turn `current` into `next`.
    fn log_ddl(current: Option<&TableDefinition>, next: &TableDefinition, recreate: bool) {
        let altered = match current {
            Some(current) if !recreate => {
                let added: Vec<ColumnDef> = next
                    .columns
                    .iter()
                    .filter(|c| current.column(&c.name).is_none())
                    .cloned()
                    .collect();
                if !added.is_empty() {
                    tracing::debug!("{}", ddl::add_columns_sql(current, &added));
                }
                Some(current)
            }
            Some(_) => {
                tracing::debug!("{}", ddl::drop_table_sql(&next.database, &next.name));
                tracing::debug!("{}", ddl::create_table_sql(next));
                None
            }
            None => {
                tracing::debug!("{}", ddl::create_table_sql(next));
                None
            }
        };

        for partition in &next.partitions {
            match altered.and_then(|t| t.partition(&partition.column, &partition.value)) {
                Some(known) if known.location == partition.location => {}
                Some(_) => tracing::debug!("{}", ddl::set_partition_location_sql(next, partition)),
                None => tracing::debug!("{}", ddl::add_partition_sql(next, partition)),
            }
        }
    }
}

#[async_trait]
impl<S: Storage> Catalog for FileCatalog<S> {
    async fn get_table(&self, database: &str, table: &str) -> Result<Option<TableDefinition>> {
        let path = Self::table_path(database, table);
        if !self.storage.exists(&path).await? {
            return Ok(None);
        }
        let data = self.storage.read_file(&path).await?;
        Ok(Some(serde_json::from_slice(&data)?))
    }

    async fn publish_table(&self, definition: &TableDefinition, recreate: bool) -> Result<()> {
        let current = self
            .get_table(&definition.database, &definition.name)
            .await?;
        if let Some(current) = &current {
            if !recreate && current.partition_columns != definition.partition_columns {
                return Err(EtlError::SchemaMismatchError {
                    table: definition.qualified_name(),
                    message: format!(
                        "Table is partitioned by [{}], not [{}]",
                        current.partition_columns.join(", "),
                        definition.partition_columns.join(", ")
                    ),
                });
            }
        }

        Self::log_ddl(current.as_ref(), definition, recreate);
        self.save(definition).await?;
        tracing::info!(
            "Published table {} ({} partition(s))",
            definition.qualified_name(),
            definition.partitions.len()
        );
        Ok(())
    }

    async fn list_partitions(&self, database: &str, table: &str) -> Result<Vec<PartitionEntry>> {
        Ok(self
            .get_table(database, table)
            .await?
            .map(|t| t.partitions)
            .unwrap_or_default())
    }
}
