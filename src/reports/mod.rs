pub mod formatters;
pub mod generator;

pub use formatters::{
    write_report, CsvFormatter, HtmlFormatter, JsonFormatter, OutputFormat, ReportFormatter,
};
pub use generator::{LineageReport, ReportGenerator, RunSummary, TreeSummary};
