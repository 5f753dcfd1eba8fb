// Small reusable page container; used by every list endpoint that pages
// over a collection rather than each call site slicing ad hoc.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub limit: usize,
    pub total: usize,
}

impl<T> Page<T> {
    pub fn of(mut items: Vec<T>, page: usize, limit: usize, total: usize) -> Self {
        items.truncate(limit);
        Self {
            items,
            page,
            limit,
            total,
        }
    }

    // Slices an already-fetched, newest-first collection into the
    // requested page. `page` is 1-indexed.
    pub fn slice(all: Vec<T>, page: usize, limit: usize) -> Self {
        let total = all.len();
        let page = page.max(1);
        let start = (page - 1) * limit;
        let items: Vec<T> = all.into_iter().skip(start).take(limit).collect();
        Self {
            items,
            page,
            limit,
            total,
        }
    }
}
