// Fixed-width pipe tables as the shell prints them.

use std::borrow::Cow;

/// Columns are never narrower than this.
pub const MIN_COLUMN_WIDTH: usize = 15;

#[derive(Debug, Clone, PartialEq)]
pub struct TextTable {
    pub columns: Vec<String>,
    pub widths: Vec<usize>,
}

impl TextTable {
    /// Size every column to fit its name and every value in `rows`.
    pub fn fit(columns: Vec<String>, rows: &[Vec<String>]) -> Self {
        let columns: Vec<String> = columns.iter().map(|name| escape_cell(name).into_owned()).collect();
        let mut widths: Vec<usize> = columns
            .iter()
            .map(|name| name.chars().count().max(MIN_COLUMN_WIDTH))
            .collect();
        for row in rows {
            for (i, value) in row.iter().enumerate() {
                if let Some(width) = widths.get_mut(i) {
                    *width = (*width).max(escape_cell(value).chars().count());
                }
            }
        }
        Self { columns, widths }
    }

    /// Column names centered in their width, joined with `|`.
    pub fn header(&self) -> String {
        let mut out = String::new();
        for (i, (name, width)) in self.columns.iter().zip(&self.widths).enumerate() {
            if i > 0 {
                out.push('|');
            }
            let len = name.chars().count();
            let left = width.saturating_sub(len) / 2;
            let right = width.saturating_sub(len + left);
            out.push_str(&" ".repeat(left));
            out.push_str(name);
            out.push_str(&" ".repeat(right));
        }
        out
    }

    /// Dash runs matching each column width, joined with `+`.
    pub fn separator(&self) -> String {
        self.widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("+")
    }

    /// Values left-aligned and padded to their column width.
    pub fn row(&self, values: &[String]) -> String {
        let mut out = String::new();
        for (i, width) in self.widths.iter().enumerate() {
            if i > 0 {
                out.push('|');
            }
            let value = escape_cell(values.get(i).map(String::as_str).unwrap_or(""));
            out.push_str(&value);
            out.push_str(&" ".repeat(width.saturating_sub(value.chars().count())));
        }
        out
    }
}

/// Line breaks inside a value would end the row, or the whole response, early.
pub fn escape_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r']) {
        Cow::Owned(value.replace('\r', "\\r").replace('\n', "\\n"))
    } else {
        Cow::Borrowed(value)
    }
}

/// Split a header or data line back into trimmed cells.
pub fn split_cells(line: &str) -> Vec<String> {
    line.split('|').map(|cell| cell.trim().to_string()).collect()
}

/// True for a dash line such as `-----+-----`.
pub fn is_separator_line(line: &str) -> bool {
    !line.is_empty()
        && line.split('+').all(|run| !run.is_empty() && run.chars().all(|c| c == '-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc() -> TextTable {
        TextTable::fit(
            vec!["a".into(), "b".into(), "c".into()],
            &[vec!["1".into(), "2".into(), "3".into()]],
        )
    }

    #[test]
    fn test_header_is_centered() {
        assert_eq!(abc().header(), "       a       |       b       |       c       ");
    }

    #[test]
    fn test_separator_matches_widths() {
        assert_eq!(abc().separator(), "---------------+---------------+---------------");
    }

    #[test]
    fn test_row_is_left_aligned() {
        let table = abc();
        let row = table.row(&["1".into(), "2".into(), "3".into()]);
        assert_eq!(row, "1              |2              |3              ");
    }

    #[test]
    fn test_wide_values_grow_column() {
        let table = TextTable::fit(
            vec!["name".into()],
            &[vec!["a_rather_long_table_name".into()]],
        );
        assert_eq!(table.widths, vec![24]);
        assert_eq!(table.separator().len(), 24);
    }

    #[test]
    fn test_line_breaks_are_escaped() {
        let rows = vec![vec!["\nx".to_string()], vec!["a\r\nb".to_string()]];
        let table = TextTable::fit(vec!["multi\nline".into()], &rows);
        assert_eq!(table.header(), "  multi\\nline  ");
        assert_eq!(table.row(&rows[0]), format!("\\nx{}", " ".repeat(12)));
        assert_eq!(table.row(&rows[1]), format!("a\\r\\nb{}", " ".repeat(9)));
        assert!(!table.row(&rows[1]).contains('\n'));
    }

    #[test]
    fn test_split_cells() {
        assert_eq!(split_cells("       a       |       b       "), vec!["a", "b"]);
    }

    #[test]
    fn test_is_separator_line() {
        assert!(is_separator_line("-----+---"));
        assert!(!is_separator_line(""));
        assert!(!is_separator_line("--+"));
        assert!(!is_separator_line("1    |2"));
    }
}
