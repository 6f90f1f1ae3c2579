use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Platform, SourcePlatform, StockItem};
use crate::error::{EngineError, EngineResult};

/// 第三阶段行状态; 只有 `Ready` 行可以进入最终提交
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowStatus {
    #[serde(rename = "Ready")]
    Ready,
    #[serde(rename = "Pending S2")]
    PendingS2,
    #[serde(rename = "Stok Kurang")]
    StokKurang,
    #[serde(rename = "Belum Scan S1")]
    BelumScanS1,
    #[serde(rename = "Butuh Input")]
    ButuhInput,
    #[serde(rename = "Sudah Proses")]
    SudahProses,
}

impl RowStatus {
    pub fn label(&self) -> &'static str {
        match self {
            RowStatus::Ready => "Ready",
            RowStatus::PendingS2 => "Pending S2",
            RowStatus::StokKurang => "Stok Kurang",
            RowStatus::BelumScanS1 => "Belum Scan S1",
            RowStatus::ButuhInput => "Butuh Input",
            RowStatus::SudahProses => "Sudah Proses",
        }
    }
}

/// 第三阶段可编辑工作行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage3Row {
    pub id: Uuid,
    /// 拆分产生的子行指向最初的原行
    pub parent_id: Option<Uuid>,
    /// 同一拆分组的总行数; 未拆分为 0
    #[serde(default)]
    pub split_count: u32,
    pub resi: String,
    pub platform: Platform,
    pub sub_channel: String,
    pub order_id: String,
    pub customer: String,
    pub source: Option<SourcePlatform>,
    /// CSV 中的商品名 (用于别名字典)
    pub product_name: String,
    pub part_number: String,
    pub stock_name: String,
    pub quantity: i32,
    pub harga_total: BigDecimal,
    pub harga_satuan: BigDecimal,
    pub stock_qty: i32,
    pub is_stage1_found: bool,
    pub is_processed: bool,
    pub is_db_verified: bool,
    pub is_stock_valid: bool,
    pub status: RowStatus,
}

impl Stage3Row {
    pub fn has_part(&self) -> bool {
        !self.part_number.trim().is_empty()
    }

    pub fn is_ready(&self) -> bool {
        self.status == RowStatus::Ready
    }

    /// 根据实时库存重新计算库存有效性
    pub fn apply_stock(&mut self, stock: Option<&StockItem>) {
        match stock {
            Some(item) if self.has_part() => {
                self.stock_qty = item.quantity;
                self.stock_name = item.name.clone();
                self.is_stock_valid = self.quantity > 0 && item.quantity >= self.quantity;
            }
            _ => {
                self.stock_qty = 0;
                self.stock_name.clear();
                self.is_stock_valid = false;
            }
        }
        self.refresh_status();
    }

    /// 状态判定顺序: 未扫描 > 已处理 > 未验证 > 缺零件号 > 库存不足
    pub fn refresh_status(&mut self) {
        self.status = if !self.is_stage1_found {
            RowStatus::BelumScanS1
        } else if self.is_processed {
            RowStatus::SudahProses
        } else if !self.is_db_verified {
            RowStatus::PendingS2
        } else if !self.has_part() {
            RowStatus::ButuhInput
        } else if !self.is_stock_valid {
            RowStatus::StokKurang
        } else {
            RowStatus::Ready
        };
    }

    pub fn recompute_unit_price(&mut self) {
        self.harga_satuan = if self.quantity > 0 {
            (&self.harga_total / &BigDecimal::from(self.quantity)).round(2)
        } else {
            BigDecimal::zero()
        };
    }

    /// 一张运单含多个 SKU 时拆成 N 行, 总价平均分摊, 每行需重新填写零件号
    ///
    /// 再次拆分子行时子行归入原拆分组, 组内总行数相应增加
    pub fn split(&self, parts: usize) -> EngineResult<Vec<Stage3Row>> {
        if parts < 2 {
            return Err(EngineError::Validation(format!(
                "split needs at least 2 parts, got {parts}"
            )));
        }
        let share = (&self.harga_total / &BigDecimal::from(parts as u64)).round(2);
        let (root, total) = match self.parent_id {
            Some(root) => (root, self.split_count + parts as u32 - 1),
            None => (self.id, parts as u32),
        };

        let children = (0..parts)
            .map(|_| {
                let mut child = self.clone();
                child.id = Uuid::new_v4();
                child.parent_id = Some(root);
                child.split_count = total;
                child.part_number.clear();
                child.harga_total = share.clone();
                child.recompute_unit_price();
                child.apply_stock(None);
                child
            })
            .collect();

        Ok(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(total: i64, qty: i32) -> Stage3Row {
        let mut r = Stage3Row {
            id: Uuid::new_v4(),
            parent_id: None,
            split_count: 0,
            resi: "SPX001".into(),
            platform: Platform::Shopee,
            sub_channel: "MJM".into(),
            order_id: "ORD-1".into(),
            customer: "budi".into(),
            source: Some(SourcePlatform::Shopee),
            product_name: "Kampas Rem".into(),
            part_number: "KR-01".into(),
            stock_name: String::new(),
            quantity: qty,
            harga_total: BigDecimal::from(total),
            harga_satuan: BigDecimal::zero(),
            stock_qty: 0,
            is_stage1_found: true,
            is_processed: false,
            is_db_verified: true,
            is_stock_valid: false,
            status: RowStatus::ButuhInput,
        };
        r.recompute_unit_price();
        r
    }

    fn stock(qty: i32) -> StockItem {
        StockItem {
            part_number: "KR-01".into(),
            name: "KAMPAS REM DEPAN".into(),
            quantity: qty,
        }
    }

    #[test]
    fn ready_needs_verification_stock_and_part() {
        let mut r = row(30000, 2);
        r.apply_stock(Some(&stock(5)));
        assert_eq!(r.status, RowStatus::Ready);
        assert_eq!(r.stock_name, "KAMPAS REM DEPAN");

        r.apply_stock(Some(&stock(1)));
        assert_eq!(r.status, RowStatus::StokKurang);

        r.is_db_verified = false;
        r.apply_stock(Some(&stock(5)));
        assert_eq!(r.status, RowStatus::PendingS2);

        r.is_stage1_found = false;
        r.refresh_status();
        assert_eq!(r.status, RowStatus::BelumScanS1);
    }

    #[test]
    fn missing_part_needs_input() {
        let mut r = row(30000, 1);
        r.part_number = "  ".into();
        r.apply_stock(Some(&stock(5)));
        assert_eq!(r.status, RowStatus::ButuhInput);
        assert!(!r.is_stock_valid);
    }

    #[test]
    fn processed_row_is_never_ready() {
        let mut r = row(30000, 1);
        r.is_processed = true;
        r.apply_stock(Some(&stock(5)));
        assert_eq!(r.status, RowStatus::SudahProses);
    }

    #[test]
    fn split_shares_price_and_clears_parts() {
        let mut r = row(30000, 1);
        r.apply_stock(Some(&stock(5)));
        let children = r.split(3).unwrap();

        assert_eq!(children.len(), 3);
        for child in &children {
            assert_eq!(child.harga_total, BigDecimal::from(10000));
            assert_eq!(child.parent_id, Some(r.id));
            assert_eq!(child.split_count, 3);
            assert!(child.part_number.is_empty());
            assert_eq!(child.status, RowStatus::ButuhInput);
        }
        assert_ne!(children[0].id, children[1].id);
    }

    #[test]
    fn splitting_a_child_grows_the_original_group() {
        let r = row(30000, 1);
        let children = r.split(2).unwrap();
        let grandchildren = children[0].split(2).unwrap();

        for g in &grandchildren {
            assert_eq!(g.parent_id, Some(r.id));
            assert_eq!(g.split_count, 3);
            assert_eq!(g.harga_total, BigDecimal::from(7500));
        }
    }

    #[test]
    fn split_rejects_single_part() {
        assert!(row(100, 1).split(1).is_err());
    }

    #[test]
    fn status_serializes_as_label() {
        let json = serde_json::to_string(&RowStatus::PendingS2).unwrap();
        assert_eq!(json, "\"Pending S2\"");
        assert_eq!(RowStatus::StokKurang.label(), "Stok Kurang");
    }
}
