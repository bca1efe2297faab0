use crate::storage::DbStats;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Table")]
    pub table: String,
    #[tabled(rename = "Rows")]
    pub rows: String,
}

#[derive(Default)]
pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_row(&mut self, table: &str, rows: &str) {
        self.rows.push(TableRow {
            table: table.to_string(),
            rows: rows.to_string(),
        });
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }
        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

/// Row counts per table
pub fn stats_table(stats: &DbStats) -> String {
    let mut builder = TableBuilder::new();
    for table in &stats.tables {
        builder.add_row(&table.name, &table.rows.to_string());
    }
    builder.build()
}
