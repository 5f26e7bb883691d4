use crate::identity::float_repr;
use crate::record::TrackerRecord;

/// Columns shown by default when printing a partition.
pub const SUMMARY_COLUMNS: [&str; 7] = [
    "ResourceId",
    "Account",
    "Savings Type",
    "estimatedMonthlySavings",
    "FinOpsStatus",
    "FinOpsLastModified",
    "Comments",
];

const MAX_CELL_WIDTH: usize = 48;

/// Text of one column of a record, as shown in a table.
pub fn cell(record: &TrackerRecord, column: &str) -> String {
    let day = |d: &Option<chrono::NaiveDate>| d.map(|d| d.to_string()).unwrap_or_default();
    match column {
        "ResourceId" => record.resource_id.clone(),
        "RecommendationId" => record.recommendation_id.clone(),
        "DateOfSavings" => day(&record.date_of_savings),
        "FinOpsStatus" => record.status.to_string(),
        "FinOpsLastModified" => day(&record.last_modified),
        "Comments" => record.comments.clone(),
        "Account" => record.account.clone(),
        "estimatedMonthlySavings" => float_repr(record.estimated_monthly_savings),
        "Savings Type" => record.savings_type.clone(),
        "Cost Center" => record.cost_center.clone(),
        "Service Group" => record.service_group.clone(),
        "Optimization Exemption" => record.optimization_exemption.clone(),
        "Resource ID + Type" => record.resource_id_type.clone(),
        "Name" => record.name.clone(),
        "RowKey" => record.row_key.as_ref().map(|k| k.to_string()).unwrap_or_default(),
        _ => String::new(),
    }
}

fn clip(text: &str) -> String {
    if text.chars().count() <= MAX_CELL_WIDTH {
        text.to_string()
    } else {
        let mut clipped: String = text.chars().take(MAX_CELL_WIDTH - 1).collect();
        clipped.push('…');
        clipped
    }
}

/// Render records as an aligned text table with a row index column.
pub fn render_table(records: &[TrackerRecord], columns: &[&str]) -> String {
    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|r| columns.iter().map(|c| clip(&cell(r, c))).collect())
        .collect();

    let index_width = records.len().saturating_sub(1).to_string().len().max(1);
    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, name)| {
            rows.iter()
                .map(|row| row[i].chars().count())
                .max()
                .unwrap_or(0)
                .max(name.chars().count())
        })
        .collect();

    let mut out = String::new();
    out.push_str(&" ".repeat(index_width));
    for (name, width) in columns.iter().zip(&widths) {
        out.push_str(&format!(" | {:<width$}", name, width = *width));
    }
    out.push('\n');
    out.push_str(&"-".repeat(index_width));
    for width in &widths {
        out.push_str(&format!("-+-{}", "-".repeat(*width)));
    }
    out.push('\n');
    for (index, row) in rows.iter().enumerate() {
        out.push_str(&format!("{:>width$}", index, width = index_width));
        for (text, width) in row.iter().zip(&widths) {
            out.push_str(&format!(" | {:<width$}", text, width = *width));
        }
        out.push('\n');
    }
    out
}

pub fn print_records_table(records: &[TrackerRecord], columns: &[&str]) {
    print!("{}", render_table(records, columns));
}
