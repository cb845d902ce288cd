//! Read-only catalogs: models, completion criteria, context modes.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};

use stepflow_types::config::GlobalConfig;
use stepflow_types::workflow::{ContextModeKind, CriterionKind};

pub fn list_models(config: &GlobalConfig, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&config.models.catalog)?);
        return Ok(());
    }

    let mut table = catalog_table(["ID", "Name", "Description"]);
    for model in &config.models.catalog {
        table.add_row(vec![
            Cell::new(&model.id),
            Cell::new(&model.name),
            Cell::new(&model.description),
        ]);
    }
    print_table(&table);
    Ok(())
}

pub fn list_criteria(json: bool) -> Result<()> {
    let rows = CriterionKind::ALL.map(|k| (k.as_str(), k.label(), k.description()));
    print_rows(&rows, json)
}

pub fn list_context_modes(json: bool) -> Result<()> {
    let rows = ContextModeKind::ALL.map(|k| (k.as_str(), k.label(), k.description()));
    print_rows(&rows, json)
}

fn print_rows(rows: &[(&str, &str, &str)], json: bool) -> Result<()> {
    if json {
        let out: Vec<_> = rows
            .iter()
            .map(|(value, label, description)| {
                serde_json::json!({"value": value, "label": label, "description": description})
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let mut table = catalog_table(["Value", "Label", "Description"]);
    for (value, label, description) in rows {
        table.add_row(vec![Cell::new(value), Cell::new(label), Cell::new(description)]);
    }
    print_table(&table);
    Ok(())
}

fn catalog_table(header: [&str; 3]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new(header[0]).fg(Color::Cyan),
            Cell::new(header[1]),
            Cell::new(header[2]),
        ]);
    table
}

fn print_table(table: &Table) {
    println!();
    println!("{table}");
    println!();
}
