pub mod currency;
pub mod marketplace;

pub use currency::{Currency, CurrencyNormalizer, Money};
pub use marketplace::{
    detect_csv_platform, parse_export, split_csv_line, CsvPlatform, FormatProfile, ParseError,
    ParsedExport,
};
