use std::borrow::Cow;
use std::fmt::Write as _;

use crate::preparer::{PlannedTable, describe_plan};

const PLAN_HEADERS: [&str; 4] = ["table", "action", "column", "detail"];

/// One row per planned mutation; tables without work get a single `no change` row.
pub fn plan_rows(plans: &[PlannedTable]) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    for planned in plans {
        let table = planned.table_id.clone();
        if planned.create_bucket {
            rows.push(vec![
                table.clone(),
                "create bucket".to_string(),
                String::new(),
                String::new(),
            ]);
        }
        let described = describe_plan(&planned.plan);
        if described.is_empty() && planned.delete_rows.is_none() {
            rows.push(vec![
                table.clone(),
                "no change".to_string(),
                String::new(),
                String::new(),
            ]);
        }
        for (action, column, detail) in described {
            rows.push(vec![table.clone(), action, column, detail]);
        }
        if let Some(filter) = &planned.delete_rows {
            rows.push(vec![
                table.clone(),
                "delete rows".to_string(),
                filter.column.clone(),
                format!("{} [{}]", filter.operator.as_str(), filter.values.join(", ")),
            ]);
        }
    }
    rows
}

pub fn render_plan(plans: &[PlannedTable]) -> String {
    let headers = PLAN_HEADERS.iter().map(|h| h.to_string()).collect::<Vec<_>>();
    render_table(&headers, &plan_rows(plans))
}

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let column_count = headers.len();
    let mut widths = headers.iter().map(|h| h.chars().count()).collect::<Vec<_>>();

    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(cell.chars().count());
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers, &widths));

    let separator_widths = widths.iter().map(|w| (*w).max(3)).collect::<Vec<usize>>();
    let separator_cells = separator_widths
        .iter()
        .map(|w| "-".repeat(*w))
        .collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&separator_cells, &separator_widths));

    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let cells = values
        .iter()
        .zip(widths)
        .map(|(value, width)| {
            let sanitized = sanitize_cell(value);
            let padding = width.saturating_sub(sanitized.chars().count());
            format!("{sanitized}{}", " ".repeat(padding))
        })
        .collect::<Vec<_>>();
    cells.join("  ").trim_end().to_string()
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        changes::{PrimaryKeyChange, TableChangesStore},
        preparer::TablePlan,
        storage_api::{DeleteFilter, DeleteOperator},
    };

    #[test]
    fn renders_aligned_columns() {
        let headers = vec!["a".to_string(), "long header".to_string()];
        let rows = vec![vec!["value".to_string(), "x".to_string()]];
        let rendered = render_table(&headers, &rows);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "a      long header");
        assert_eq!(lines[1], "-----  -----------");
        assert_eq!(lines[2], "value  x");
    }

    #[test]
    fn plan_rows_cover_every_action() {
        let mut changes = TableChangesStore::new();
        changes.set_primary_key_change(PrimaryKeyChange::Reset);
        let plans = vec![
            PlannedTable {
                table_id: "out.c-main.a".to_string(),
                create_bucket: false,
                plan: TablePlan::Update {
                    changes: TableChangesStore::new(),
                    attributes: Vec::new(),
                },
                delete_rows: None,
            },
            PlannedTable {
                table_id: "out.c-main.b".to_string(),
                create_bucket: false,
                plan: TablePlan::Update {
                    changes,
                    attributes: Vec::new(),
                },
                delete_rows: Some(DeleteFilter {
                    column: "status".to_string(),
                    operator: DeleteOperator::Eq,
                    values: vec!["old".to_string()],
                }),
            },
        ];
        let rows = plan_rows(&plans);
        assert_eq!(rows[0][1], "no change");
        assert_eq!(rows[1][1], "drop primary key");
        assert_eq!(rows[2][1], "delete rows");
        assert_eq!(rows[2][3], "eq [old]");
    }
}
