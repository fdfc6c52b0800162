use std::fmt::{self, Write};

pub(crate) struct Row {
    cells: Vec<String>,
}

impl Row {
    fn is_awk_safe(&self) -> bool {
        !self
            .cells
            .iter()
            .any(|cell| cell.contains(char::is_whitespace))
    }

    fn columns(&self) -> usize {
        self.cells.len()
    }
}

pub(crate) trait IntoRow: Into<Row> + Sized {
    fn into_row(self) -> Row {
        self.into()
    }
}

impl<T> IntoRow for T where T: Into<Row> + Sized {}

impl From<Vec<String>> for Row {
    fn from(value: Vec<String>) -> Self {
        Row { cells: value }
    }
}

impl From<Vec<&str>> for Row {
    fn from(value: Vec<&str>) -> Self {
        let value: Vec<String> = value.into_iter().map(|s| s.to_owned()).collect();

        value.into()
    }
}

pub(crate) struct Table {
    body: Vec<Row>,
    header: Option<Row>,
    num_columns: Option<usize>,
    print_header: bool,
}

impl Table {
    pub(crate) fn new() -> Table {
        Table {
            body: Vec::new(),
            header: None,
            num_columns: None,
            print_header: true,
        }
    }

    /// Every row of a table has the same number of cells.
    fn expect_num_columns(&mut self, num_columns: usize) {
        let expected = *self.num_columns.get_or_insert(num_columns);

        debug_assert_eq!(
            expected, num_columns,
            "table has {} columns but a row with {} columns was inserted",
            expected, num_columns
        );
    }

    pub(crate) fn print_header(&mut self, print_header: bool) {
        self.print_header = print_header;
    }

    pub(crate) fn add_row<S: IntoRow>(&mut self, row: S) {
        let row = row.into_row();

        self.expect_num_columns(row.columns());

        self.body.push(row);
    }

    pub(crate) fn set_header<S: IntoRow>(&mut self, header: S) {
        let header = header.into_row();

        self.expect_num_columns(header.columns());

        debug_assert!(header.is_awk_safe(), "table header contains whitespace");

        self.header.replace(header);
    }

    fn iter_rows(&self) -> impl Iterator<Item = &Row> {
        self.header.iter().chain(self.body.iter())
    }

    fn column_widths(&self) -> Vec<usize> {
        let n_cols = match self.num_columns {
            Some(n_cols) => n_cols,
            None => return Vec::new(),
        };

        let mut widths = vec![0usize; n_cols];

        for row in self.iter_rows() {
            for (width, cell) in widths.iter_mut().zip(&row.cells) {
                *width = (*width).max(cell.chars().count());
            }
        }

        widths
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let widths = self.column_widths();

        let mut print_row = |row: &Row| -> std::fmt::Result {
            for (i, cell) in row.cells.iter().enumerate() {
                let width = widths.get(i).copied().unwrap_or(0);

                f.write_fmt(format_args!("{:<width$}", cell, width = width))?;

                if i != row.cells.len() - 1 {
                    f.write_str("  ")?;
                }
            }

            f.write_char('\n')?;

            Ok(())
        };

        match self.print_header {
            true => {
                for row in self.iter_rows() {
                    print_row(row)?;
                }
            }
            false => {
                for row in self.body.iter() {
                    print_row(row)?;
                }
            }
        }

        Ok(())
    }
}

pub(crate) trait IntoTable: Into<Table> + Sized {
    fn into_table(self) -> Table {
        self.into()
    }
}

impl<T> IntoTable for T where T: Into<Table> + Sized {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        let mut tab = Table::new();

        tab.set_header(vec!["PROVIDER", "MODELS"]);
        tab.add_row(vec!["Bing", "gpt-4"]);
        tab.add_row(vec!["Liaobots", "claude-3,gpt-4"]);

        tab
    }

    #[test]
    fn test_columns_are_aligned() {
        assert_eq!(
            sample().to_string(),
            "PROVIDER  MODELS        \n\
             Bing      gpt-4         \n\
             Liaobots  claude-3,gpt-4\n"
        );
    }

    #[test]
    fn test_headerless() {
        let mut tab = sample();
        tab.print_header(false);

        assert_eq!(tab.to_string().lines().count(), 2);
        assert!(tab.to_string().starts_with("Bing"));
    }

    #[test]
    fn test_empty_table() {
        assert_eq!(Table::new().to_string(), "");
    }
}
