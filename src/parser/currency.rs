use bigdecimal::{BigDecimal, One, Zero};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::config::ExchangeRates;

/// 导出文件中可能出现的币种; 无标记视为基础货币 (IDR)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Myr,
    Php,
    Sgd,
    Usd,
    Idr,
}

/// 检测顺序即优先级: "S$" 必须先于 "$" 判断
const MARKERS: &[(Currency, &[&str])] = &[
    (Currency::Myr, &["RM", "MYR"]),
    (Currency::Php, &["₱", "PHP"]),
    (Currency::Sgd, &["S$", "SGD"]),
    (Currency::Usd, &["$", "USD"]),
];

/// 解析后的金额
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Money {
    pub amount: BigDecimal,
    pub currency: Currency,
    pub rate: BigDecimal,
}

impl Money {
    pub fn base(&self) -> BigDecimal {
        &self.amount * &self.rate
    }
}

/// 币种折算器, 永不报错: 无法解析的输入返回金额 0、汇率 1
#[derive(Debug, Clone, Default)]
pub struct CurrencyNormalizer {
    rates: ExchangeRates,
}

impl CurrencyNormalizer {
    pub fn new(rates: ExchangeRates) -> Self {
        Self { rates }
    }

    pub fn rate(&self, currency: Currency) -> BigDecimal {
        match currency {
            Currency::Myr => self.rates.myr.clone(),
            Currency::Php => self.rates.php.clone(),
            Currency::Sgd => self.rates.sgd.clone(),
            Currency::Usd => self.rates.usd.clone(),
            Currency::Idr => BigDecimal::one(),
        }
    }

    pub fn detect(raw: &str) -> Currency {
        let upper = raw.to_uppercase();
        MARKERS
            .iter()
            .find(|(_, marks)| marks.iter().any(|m| upper.contains(m)))
            .map(|(c, _)| *c)
            .unwrap_or(Currency::Idr)
    }

    pub fn parse(&self, raw: &str) -> Money {
        let cleaned = raw.replace(',', "");
        let currency = Self::detect(&cleaned);
        let digits: String = cleaned
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
            .collect();

        match BigDecimal::from_str(&digits) {
            Ok(amount) => Money {
                amount,
                currency,
                rate: self.rate(currency),
            },
            Err(_) => Money {
                amount: BigDecimal::zero(),
                currency: Currency::Idr,
                rate: BigDecimal::one(),
            },
        }
    }

    /// 折算为基础货币金额
    pub fn normalize(&self, raw: &str) -> BigDecimal {
        self.parse(raw).base()
    }
}
