//! Resolution selection: validating an option number and the interactive prompt

use crate::catalog::{ResolutionCatalog, ResolutionLevel};
use crate::error::{DownsampleError, Result};
use std::io::{BufRead, Write};
use tracing::debug;

/// Prompt shown before reading an option number
pub const PROMPT: &str = "Enter a downsampling option number from the table above: ";

/// Shown after an answer that names no selectable option
pub const RETRY_MESSAGE: &str =
    "The entered number is not an option from the table. Please try again.";

/// Check that `index` names a selectable level: `1 <= index < resolution_count`.
pub fn validate_selection(index: usize, resolution_count: usize) -> Result<()> {
    if index < 1 || index >= resolution_count {
        return Err(DownsampleError::OutOfRangeSelection {
            index,
            resolution_count,
        });
    }
    Ok(())
}

/// Chooses the level to downsample to from a catalog
#[derive(Debug, Clone, Copy)]
pub struct ResolutionSelector<'a> {
    catalog: &'a ResolutionCatalog,
}

impl<'a> ResolutionSelector<'a> {
    /// Fails with [`DownsampleError::SingleResolutionLevel`] when the project
    /// has nothing coarser than its current level.
    pub fn new(catalog: &'a ResolutionCatalog) -> Result<Self> {
        if catalog.resolution_count() <= 1 {
            return Err(DownsampleError::SingleResolutionLevel);
        }
        Ok(Self { catalog })
    }

    pub fn catalog(&self) -> &ResolutionCatalog {
        self.catalog
    }

    /// Validate an option number and return its level
    pub fn select(&self, index: usize) -> Result<ResolutionLevel> {
        validate_selection(index, self.catalog.resolution_count())?;
        self.catalog
            .get(index)
            .cloned()
            .ok_or(DownsampleError::OutOfRangeSelection {
                index,
                resolution_count: self.catalog.resolution_count(),
            })
    }

    /// Parse one line of operator input into a level
    pub fn select_input(&self, input: &str) -> Result<ResolutionLevel> {
        let trimmed = input.trim();
        let index: usize = trimmed.parse().map_err(|_| {
            DownsampleError::InvalidSelection(format!("'{}' is not an option number", trimmed))
        })?;
        self.select(index)
    }

    /// Ask until the operator enters a valid option.
    ///
    /// Invalid answers are reported on `output` and asked again; end of input
    /// fails with [`DownsampleError::InputClosed`].
    pub fn prompt<R: BufRead, W: Write>(&self, input: &mut R, output: &mut W) -> Result<ResolutionLevel> {
        let mut line = String::new();
        loop {
            write!(output, "\n{}", PROMPT)?;
            output.flush()?;

            line.clear();
            if input.read_line(&mut line)? == 0 {
                return Err(DownsampleError::InputClosed);
            }

            match self.select_input(&line) {
                Ok(level) => return Ok(level),
                Err(e) if e.is_recoverable() => {
                    debug!(input = line.trim(), "rejected selection: {}", e);
                    writeln!(output, "\n{}", RETRY_MESSAGE)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Render the catalog as a grid table
    pub fn render_table(&self) -> String {
        render_table(self.catalog)
    }
}

/// Render the catalog with `Option`, `Resolution` and `Data Size` columns
pub fn render_table(catalog: &ResolutionCatalog) -> String {
    let headers = ["Option", "Resolution", "Data Size"];
    let rows: Vec<[String; 3]> = catalog
        .rows()
        .into_iter()
        .map(|row| {
            let [x, y, z] = row.resolution;
            [row.option, format!("[{}, {}, {}]", x, y, z), row.data_size]
        })
        .collect();

    let mut widths = headers.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let border = |fill: char| {
        let mut line = String::from("+");
        for width in widths {
            line.extend(std::iter::repeat(fill).take(width + 2));
            line.push('+');
        }
        line.push('\n');
        line
    };
    let line = |cells: [&str; 3]| {
        let mut text = String::from("|");
        for (cell, width) in cells.iter().zip(widths) {
            text.push_str(&format!(" {:<width$} |", cell, width = width));
        }
        text.push('\n');
        text
    };

    let mut table = border('-');
    table.push_str(&line(headers));
    table.push_str(&border('='));
    for row in &rows {
        table.push_str(&line([&row[0], &row[1], &row[2]]));
        table.push_str(&border('-'));
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataType, Extent3};
    use std::io::Cursor;

    fn catalog(map: &[u64]) -> ResolutionCatalog {
        ResolutionCatalog::build(Extent3::cube(32), map, DataType::U8, 1).unwrap()
    }

    #[test]
    fn test_validate_selection_range() {
        assert!(validate_selection(0, 4).is_err());
        for index in 1..4 {
            assert!(validate_selection(index, 4).is_ok());
        }
        assert!(validate_selection(4, 4).is_err());
        assert!(validate_selection(99, 4).is_err());
        assert!(validate_selection(1, 1).is_err());
    }

    #[test]
    fn test_single_level_has_nothing_to_select() {
        let catalog = catalog(&[512]);
        assert!(matches!(
            ResolutionSelector::new(&catalog),
            Err(DownsampleError::SingleResolutionLevel)
        ));
    }

    #[test]
    fn test_select_returns_level() {
        let catalog = catalog(&[8, 64, 512]);
        let selector = ResolutionSelector::new(&catalog).unwrap();

        let level = selector.select(1).unwrap();
        assert_eq!(level.level, 0);
        assert_eq!(level.dimensions, Extent3::cube(64));

        assert!(matches!(
            selector.select(3),
            Err(DownsampleError::OutOfRangeSelection {
                index: 3,
                resolution_count: 3
            })
        ));
        assert!(matches!(
            selector.select_input("two"),
            Err(DownsampleError::InvalidSelection(_))
        ));
        assert_eq!(selector.select_input(" 2\n").unwrap().level, 1);
    }

    #[test]
    fn test_prompt_retries_until_valid() {
        let catalog = catalog(&[8, 64, 512]);
        let selector = ResolutionSelector::new(&catalog).unwrap();

        let mut input = Cursor::new("0\nabc\n3\n2\n");
        let mut output = Vec::new();
        let level = selector.prompt(&mut input, &mut output).unwrap();
        assert_eq!(level.index, 2);

        let text = String::from_utf8(output).unwrap();
        assert_eq!(text.matches(PROMPT).count(), 4);
        assert_eq!(text.matches(RETRY_MESSAGE).count(), 3);
        assert!(!text.contains("expected 1 to"));
        assert!(!text.contains('('));
    }

    #[test]
    fn test_prompt_fails_on_closed_input() {
        let catalog = catalog(&[8, 64]);
        let selector = ResolutionSelector::new(&catalog).unwrap();

        let mut input = Cursor::new("5\n");
        let mut output = Vec::new();
        assert!(matches!(
            selector.prompt(&mut input, &mut output),
            Err(DownsampleError::InputClosed)
        ));
    }

    #[test]
    fn test_render_table() {
        let table = render_table(&catalog(&[8, 64, 512]));
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[1], "| Option  | Resolution      | Data Size |");
        assert!(lines[3].starts_with("| 1       | [64, 64, 64]    | 256 KB"));
        assert!(lines[7].starts_with("| Current | [256, 256, 256] | 16 MB"));
        assert!(lines.iter().all(|l| l.len() == lines[0].len()));
    }
}
