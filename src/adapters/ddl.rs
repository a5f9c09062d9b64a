//! Athena / Hive DDL text for catalog changes.

use crate::domain::model::ColumnType;
use crate::domain::table::{ColumnDef, PartitionEntry, StorageFormat, TableDefinition};

struct FormatClasses {
    serde: &'static str,
    input: &'static str,
    output: &'static str,
}

fn format_classes(format: StorageFormat) -> FormatClasses {
    match format {
        StorageFormat::Parquet => FormatClasses {
            serde: "org.apache.hadoop.hive.ql.io.parquet.serde.ParquetHiveSerDe",
            input: "org.apache.hadoop.hive.ql.io.parquet.MapredParquetInputFormat",
            output: "org.apache.hadoop.hive.ql.io.parquet.MapredParquetOutputFormat",
        },
        StorageFormat::Csv => FormatClasses {
            serde: "org.apache.hadoop.hive.serde2.OpenCSVSerde",
            input: "org.apache.hadoop.mapred.TextInputFormat",
            output: "org.apache.hadoop.hive.ql.io.HiveIgnoreKeyTextOutputFormat",
        },
    }
}

pub fn athena_type(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Int => "bigint",
        ColumnType::Float => "double",
        ColumnType::String => "string",
        ColumnType::Date => "date",
        ColumnType::Bool => "boolean",
    }
}

fn column_list(columns: &[ColumnDef]) -> String {
    columns
        .iter()
        .map(|c| format!("`{}` {}", c.name, athena_type(c.data_type)))
        .collect::<Vec<_>>()
        .join(",\n  ")
}

pub fn create_table_sql(table: &TableDefinition) -> String {
    let classes = format_classes(table.format);
    let mut sql = format!(
        "CREATE EXTERNAL TABLE IF NOT EXISTS {}(\n  {}\n)\n",
        table.qualified_name(),
        column_list(&table.columns)
    );

    if !table.partition_columns.is_empty() {
        let partitions: Vec<ColumnDef> = table
            .partition_columns
            .iter()
            .map(|c| ColumnDef::new(c.clone(), ColumnType::String))
            .collect();
        sql.push_str(&format!("PARTITIONED BY (\n  {}\n)\n", column_list(&partitions)));
    }

    sql.push_str(&format!(
        "ROW FORMAT SERDE '{}'\nSTORED AS INPUTFORMAT '{}'\nOUTPUTFORMAT '{}'\nLOCATION '{}'\n",
        classes.serde, classes.input, classes.output, table.location
    ));

    // CSV 檔案第一列是表頭
    match table.format {
        StorageFormat::Csv => sql.push_str(
            "TBLPROPERTIES ('has_encrypted_data'='false', 'skip.header.line.count'='1')",
        ),
        StorageFormat::Parquet => sql.push_str("TBLPROPERTIES ('has_encrypted_data'='false')"),
    }
    sql
}

pub fn add_columns_sql(table: &TableDefinition, columns: &[ColumnDef]) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMNS (\n  {}\n)",
        table.qualified_name(),
        column_list(columns)
    )
}

pub fn add_partition_sql(table: &TableDefinition, partition: &PartitionEntry) -> String {
    format!(
        "ALTER TABLE {} ADD IF NOT EXISTS PARTITION ({}='{}') LOCATION '{}'",
        table.qualified_name(),
        partition.column,
        partition.value.replace('\'', "''"),
        partition.location
    )
}

pub fn set_partition_location_sql(table: &TableDefinition, partition: &PartitionEntry) -> String {
    format!(
        "ALTER TABLE {} PARTITION ({}='{}') SET LOCATION '{}'",
        table.qualified_name(),
        partition.column,
        partition.value.replace('\'', "''"),
        partition.location
    )
}

pub fn drop_table_sql(database: &str, table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}.{}", database, table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(format: StorageFormat) -> TableDefinition {
        TableDefinition {
            database: "dev".to_string(),
            name: "targets".to_string(),
            columns: vec![
                ColumnDef::new("id", ColumnType::Int),
                ColumnDef::new("name", ColumnType::String),
            ],
            partition_columns: vec!["start_date".to_string()],
            location: "warehouse/dev/targets".to_string(),
            format,
            partitions: Vec::new(),
        }
    }

    #[test]
    fn test_create_parquet_table() {
        let sql = create_table_sql(&table(StorageFormat::Parquet));
        assert!(sql.starts_with("CREATE EXTERNAL TABLE IF NOT EXISTS dev.targets("));
        assert!(sql.contains("`id` bigint,\n  `name` string"));
        assert!(sql.contains("PARTITIONED BY (\n  `start_date` string\n)"));
        assert!(sql.contains("ParquetHiveSerDe"));
        assert!(sql.contains("LOCATION 'warehouse/dev/targets'"));
        assert!(!sql.contains("skip.header.line.count"));
    }

    #[test]
    fn test_create_csv_table_skips_header() {
        let sql = create_table_sql(&table(StorageFormat::Csv));
        assert!(sql.contains("OpenCSVSerde"));
        assert!(sql.contains("'skip.header.line.count'='1'"));
    }

    #[test]
    fn test_partition_and_drop_statements() {
        let definition = table(StorageFormat::Parquet);
        let partition = PartitionEntry {
            column: "start_date".to_string(),
            value: "2023-01-01".to_string(),
            location: "warehouse/dev/targets/start_date=2023-01-01".to_string(),
        };
        assert_eq!(
            add_partition_sql(&definition, &partition),
            "ALTER TABLE dev.targets ADD IF NOT EXISTS PARTITION (start_date='2023-01-01') \
             LOCATION 'warehouse/dev/targets/start_date=2023-01-01'"
        );
        assert_eq!(
            set_partition_location_sql(&definition, &partition),
            "ALTER TABLE dev.targets PARTITION (start_date='2023-01-01') \
             SET LOCATION 'warehouse/dev/targets/start_date=2023-01-01'"
        );
        assert_eq!(drop_table_sql("dev", "targets"), "DROP TABLE IF EXISTS dev.targets");
        assert!(add_columns_sql(&definition, &[ColumnDef::new("score", ColumnType::Float)])
            .contains("ADD COLUMNS (\n  `score` double\n)"));
    }
}
