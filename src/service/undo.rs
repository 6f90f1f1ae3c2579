use std::collections::VecDeque;

use crate::models::ReceiptScan;

/// 删除撤销栈, 由操作员会话持有并显式传入删除/撤销调用
///
/// 后删先撤; 超过深度时丢弃最早的记录。
#[derive(Debug, Clone)]
pub struct UndoStack {
    entries: VecDeque<ReceiptScan>,
    depth: usize,
}

impl UndoStack {
    pub fn new(depth: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(depth.max(1)),
            depth: depth.max(1),
        }
    }

    pub fn push(&mut self, deleted: ReceiptScan) {
        if self.entries.len() == self.depth {
            self.entries.pop_front();
        }
        self.entries.push_back(deleted);
    }

    pub fn pop(&mut self) -> Option<ReceiptScan> {
        self.entries.pop_back()
    }

    pub fn peek(&self) -> Option<&ReceiptScan> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for UndoStack {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Platform, StoreCode};
    use chrono::Utc;

    fn scan(code: &str) -> ReceiptScan {
        let store = StoreCode::parse("mjm").unwrap();
        ReceiptScan::scanned(code, Platform::Shopee, "MJM", store, "op", Utc::now())
    }

    #[test]
    fn last_deleted_comes_back_first() {
        let mut undo = UndoStack::new(3);
        undo.push(scan("A"));
        undo.push(scan("B"));
        assert_eq!(undo.pop().unwrap().code, "B");
        assert_eq!(undo.pop().unwrap().code, "A");
        assert!(undo.pop().is_none());
    }

    #[test]
    fn default_keeps_a_single_slot() {
        let mut undo = UndoStack::default();
        undo.push(scan("A"));
        undo.push(scan("B"));
        assert_eq!(undo.len(), 1);
        assert_eq!(undo.peek().unwrap().code, "B");
    }
}
