use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;

use super::CurrencyNormalizer;
use crate::models::{CsvExportItem, SourcePlatform};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// 无法识别的导出格式, 调用方必须停止而不是尝试解析
    #[error("unknown export format: no Shopee or TikTok header found")]
    UnknownFormat,

    #[error("{platform} export is missing required column '{column}'")]
    MissingColumn {
        platform: SourcePlatform,
        column: &'static str,
    },
}

/// 列名映射 (按子串匹配表头, 容忍导出格式漂移)
#[derive(Debug, Clone, Copy)]
pub struct ColumnMap {
    pub tracking: &'static str,
    pub order_id: &'static str,
    pub status: &'static str,
    pub shipping: &'static str,
    pub customer: &'static str,
    pub sku: &'static str,
    pub product_name: &'static str,
    pub quantity: &'static str,
    pub total_price: &'static str,
}

/// 单个平台的完整解析规则; 新增平台只需新增一条
#[derive(Debug, Clone, Copy)]
pub struct FormatProfile {
    pub source: SourcePlatform,
    /// 用于定位表头行和识别格式的特征列名
    pub header_marker: &'static str,
    pub columns: ColumnMap,
    /// 订单状态包含以下任一词 (不区分大小写) 即丢弃
    pub cancel_vocabulary: &'static [&'static str],
    pub placeholder_name: &'static str,
}

pub const SHOPEE: FormatProfile = FormatProfile {
    source: SourcePlatform::Shopee,
    header_marker: "No. Resi",
    columns: ColumnMap {
        tracking: "No. Resi",
        order_id: "No. Pesanan",
        status: "Status Pesanan",
        shipping: "Opsi Pengiriman",
        customer: "Username (Pembeli)",
        sku: "Nomor Referensi SKU",
        product_name: "Nama Produk",
        quantity: "Jumlah",
        total_price: "Total Harga Produk",
    },
    cancel_vocabulary: &["batal", "belum bayar"],
    placeholder_name: "Produk Shopee",
};

pub const TIKTOK: FormatProfile = FormatProfile {
    source: SourcePlatform::Tiktok,
    header_marker: "Tracking ID",
    columns: ColumnMap {
        tracking: "Tracking ID",
        order_id: "Order ID",
        status: "Order Status",
        shipping: "Delivery Option",
        customer: "Buyer Username",
        sku: "Seller SKU",
        product_name: "Product Name",
        quantity: "Quantity",
        total_price: "SKU Subtotal After Discount",
    },
    cancel_vocabulary: &["unpaid", "cancelled", "batal", "belum bayar"],
    placeholder_name: "Produk TikTok",
};

/// 检测顺序
pub const PROFILES: &[FormatProfile] = &[SHOPEE, TIKTOK];

impl FormatProfile {
    pub fn for_source(source: SourcePlatform) -> &'static FormatProfile {
        match source {
            SourcePlatform::Shopee => &PROFILES[0],
            SourcePlatform::Tiktok => &PROFILES[1],
        }
    }

    fn is_header(&self, line: &str) -> bool {
        line.to_lowercase().contains(&self.header_marker.to_lowercase())
    }

    fn is_cancelled(&self, status: &str) -> bool {
        let status = status.to_lowercase();
        self.cancel_vocabulary.iter().any(|w| status.contains(w))
    }
}

/// 格式检测结果; `Unknown` 是硬性停止信号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CsvPlatform {
    Shopee,
    Tiktok,
    Unknown,
}

impl CsvPlatform {
    pub fn source(&self) -> Option<SourcePlatform> {
        match self {
            CsvPlatform::Shopee => Some(SourcePlatform::Shopee),
            CsvPlatform::Tiktok => Some(SourcePlatform::Tiktok),
            CsvPlatform::Unknown => None,
        }
    }
}

pub fn detect_csv_platform(text: &str) -> CsvPlatform {
    let profile = PROFILES
        .iter()
        .find(|p| text.lines().any(|line| p.is_header(line)));
    match profile.map(|p| p.source) {
        Some(SourcePlatform::Shopee) => CsvPlatform::Shopee,
        Some(SourcePlatform::Tiktok) => CsvPlatform::Tiktok,
        None => CsvPlatform::Unknown,
    }
}

/// 按逗号切分, 引号内的逗号不切分; 引号按字符切换状态, 不支持转义引号
pub fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in line.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

/// 解析统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedExport {
    pub source: SourcePlatform,
    pub items: Vec<CsvExportItem>,
    pub cancelled: usize,
    pub malformed: usize,
    pub blank_tracking: usize,
}

enum RowOutcome {
    Item(CsvExportItem),
    Cancelled,
    Malformed,
    BlankTracking,
    Empty,
}

struct ColumnIndex {
    tracking: usize,
    status: usize,
    order_id: Option<usize>,
    shipping: Option<usize>,
    customer: Option<usize>,
    sku: Option<usize>,
    product_name: Option<usize>,
    quantity: Option<usize>,
    total_price: Option<usize>,
}

impl ColumnIndex {
    fn resolve(profile: &FormatProfile, headers: &[String]) -> Result<Self, ParseError> {
        let lowered: Vec<String> = headers.iter().map(|h| h.to_lowercase()).collect();
        let find = |needle: &str| {
            let needle = needle.to_lowercase();
            lowered.iter().position(|h| h.contains(&needle))
        };
        let required = |column: &'static str| {
            find(column).ok_or(ParseError::MissingColumn {
                platform: profile.source,
                column,
            })
        };

        let cols = &profile.columns;
        Ok(Self {
            tracking: required(cols.tracking)?,
            status: required(cols.status)?,
            order_id: find(cols.order_id),
            shipping: find(cols.shipping),
            customer: find(cols.customer),
            sku: find(cols.sku),
            product_name: find(cols.product_name),
            quantity: find(cols.quantity),
            total_price: find(cols.total_price),
        })
    }
}

fn field(fields: &[String], idx: Option<usize>) -> String {
    idx.and_then(|i| fields.get(i)).cloned().unwrap_or_default()
}

/// 只取整数部分 ("2.0" -> 2, "1,5" -> 1); 无法解析或非正数时按 1
fn parse_quantity(raw: &str) -> i32 {
    let digits: String = raw.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    match digits.parse::<i32>() {
        Ok(q) if q > 0 => q,
        _ => 1,
    }
}

fn parse_row(
    profile: &FormatProfile,
    cols: &ColumnIndex,
    header_len: usize,
    normalizer: &CurrencyNormalizer,
    line: &str,
) -> RowOutcome {
    if line.trim().is_empty() {
        return RowOutcome::Empty;
    }
    let fields = split_csv_line(line);
    if fields.len() < header_len {
        return RowOutcome::Malformed;
    }
    if profile.is_cancelled(&fields[cols.status]) {
        return RowOutcome::Cancelled;
    }
    let tracking_code = fields[cols.tracking].trim().to_string();
    if tracking_code.is_empty() {
        return RowOutcome::BlankTracking;
    }

    let mut product_name = field(&fields, cols.product_name);
    if product_name.is_empty() {
        product_name = profile.placeholder_name.to_string();
    }

    RowOutcome::Item(CsvExportItem {
        tracking_code,
        order_id: field(&fields, cols.order_id),
        order_status: fields[cols.status].clone(),
        shipping_option: field(&fields, cols.shipping),
        customer_name: field(&fields, cols.customer),
        sku: field(&fields, cols.sku),
        product_name,
        quantity: parse_quantity(&field(&fields, cols.quantity)),
        total_price_base: normalizer.normalize(&field(&fields, cols.total_price)),
        source_platform: profile.source,
    })
}

/// 使用指定平台规则解析
pub fn parse_with(
    profile: &FormatProfile,
    text: &str,
    normalizer: &CurrencyNormalizer,
) -> Result<ParsedExport, ParseError> {
    let lines: Vec<&str> = text.lines().collect();
    let header_at = lines
        .iter()
        .position(|line| profile.is_header(line))
        .ok_or(ParseError::UnknownFormat)?;

    let headers = split_csv_line(lines[header_at]);
    let cols = ColumnIndex::resolve(profile, &headers)?;

    let outcomes: Vec<RowOutcome> = lines[header_at + 1..]
        .par_iter()
        .map(|line| parse_row(profile, &cols, headers.len(), normalizer, line))
        .collect();

    let mut parsed = ParsedExport {
        source: profile.source,
        items: Vec::new(),
        cancelled: 0,
        malformed: 0,
        blank_tracking: 0,
    };
    for outcome in outcomes {
        match outcome {
            RowOutcome::Item(item) => parsed.items.push(item),
            RowOutcome::Cancelled => parsed.cancelled += 1,
            RowOutcome::Malformed => parsed.malformed += 1,
            RowOutcome::BlankTracking => parsed.blank_tracking += 1,
            RowOutcome::Empty => {}
        }
    }

    tracing::debug!(
        "{} export parsed: {} items, {} cancelled, {} malformed",
        profile.source,
        parsed.items.len(),
        parsed.cancelled,
        parsed.malformed
    );
    Ok(parsed)
}

/// 自动识别格式后解析; 未识别时返回 `UnknownFormat`
pub fn parse_export(text: &str, normalizer: &CurrencyNormalizer) -> Result<ParsedExport, ParseError> {
    let source = detect_csv_platform(text)
        .source()
        .ok_or(ParseError::UnknownFormat)?;
    parse_with(FormatProfile::for_source(source), text, normalizer)
}
