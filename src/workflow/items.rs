//! 目标条目台账
//!
//! 一次域阶段内每个目标条目的生命周期：待处理 → 已勾选 → 已提交，
//! 或者翻遍所有页都找不到标记为未找到。提交失败时已勾选的条目
//! 退回待处理（勾选随导航丢失，下一批可以重试）。

/// 条目状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemStatus {
    Pending,
    Selected,
    Submitted,
    NotFound,
}

#[derive(Clone, Debug)]
pub struct WorkItem {
    pub identifier: String,
    pub status: ItemStatus,
}

/// 目标条目集合
#[derive(Clone, Debug, Default)]
pub struct WorkSet {
    items: Vec<WorkItem>,
}

impl WorkSet {
    /// 去重建集，保持输入顺序
    pub fn new(identifiers: impl IntoIterator<Item = String>) -> Self {
        let mut items: Vec<WorkItem> = Vec::new();
        for identifier in identifiers {
            if !items.iter().any(|it| it.identifier == identifier) {
                items.push(WorkItem {
                    identifier,
                    status: ItemStatus::Pending,
                });
            }
        }
        Self { items }
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    /// 仍待处理的条目标识
    pub fn pending(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|it| it.status == ItemStatus::Pending)
            .map(|it| it.identifier.clone())
            .collect()
    }

    /// 把一批条目标记为已勾选
    pub fn mark_selected(&mut self, identifiers: &[String]) {
        for item in &mut self.items {
            if item.status == ItemStatus::Pending && identifiers.contains(&item.identifier) {
                item.status = ItemStatus::Selected;
            }
        }
    }

    /// 按实际提交的请求页数结算本批：前 `count` 个已勾选条目记为
    /// 已提交，余下的退回待处理（勾选随导航丢失，下一批重新勾）
    pub fn commit_submitted(&mut self, count: usize) {
        let mut committed = 0usize;
        for item in &mut self.items {
            if item.status == ItemStatus::Selected {
                if committed < count {
                    item.status = ItemStatus::Submitted;
                    committed += 1;
                } else {
                    item.status = ItemStatus::Pending;
                }
            }
        }
    }

    /// 提交失败：已勾选退回待处理
    pub fn reset_selected(&mut self) {
        for item in &mut self.items {
            if item.status == ItemStatus::Selected {
                item.status = ItemStatus::Pending;
            }
        }
    }

    /// 翻遍所有页之后，剩余待处理条目判为未找到
    pub fn mark_pending_not_found(&mut self) {
        for item in &mut self.items {
            if item.status == ItemStatus::Pending {
                item.status = ItemStatus::NotFound;
            }
        }
    }

    pub fn submitted_count(&self) -> usize {
        self.count(ItemStatus::Submitted)
    }

    pub fn not_found_count(&self) -> usize {
        self.count(ItemStatus::NotFound)
    }

    pub fn pending_count(&self) -> usize {
        self.count(ItemStatus::Pending)
    }

    fn count(&self, status: ItemStatus) -> usize {
        self.items.iter().filter(|it| it.status == status).count()
    }
}
