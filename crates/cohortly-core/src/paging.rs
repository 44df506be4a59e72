//! Keyset paging over ordered store queries.

use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub rows: Vec<T>,
    /// Key of the last row, to resume after. `None` when nothing was returned.
    pub next: Option<String>,
}

impl<T> Page<T> {
    pub fn from_rows(rows: Vec<T>, key: impl Fn(&T) -> String) -> Self {
        let next = rows.last().map(key);
        Self { rows, next }
    }
}

/// A query that can be read in key order, `limit` rows at a time, starting
/// strictly after a key.
#[async_trait]
pub trait PageSource: Send + Sync {
    type Row: Send;

    async fn fetch_page(&self, after: Option<&str>, limit: usize) -> Result<Page<Self::Row>>;
}

/// Walks a [`PageSource`] until a short page. Restart from any point by
/// handing a saved [`Pager::cursor`] to [`Pager::starting_after`].
pub struct Pager<S> {
    source: S,
    cursor: Option<String>,
    limit: usize,
    done: bool,
}

impl<S: PageSource> Pager<S> {
    pub fn new(source: S, limit: usize) -> Self {
        Self::starting_after(source, None, limit)
    }

    pub fn starting_after(source: S, cursor: Option<String>, limit: usize) -> Self {
        Self {
            source,
            cursor,
            limit: limit.max(1),
            done: false,
        }
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub async fn next_page(&mut self) -> Result<Option<Vec<S::Row>>> {
        if self.done {
            return Ok(None);
        }
        let page = self
            .source
            .fetch_page(self.cursor.as_deref(), self.limit)
            .await?;
        if page.rows.len() < self.limit || page.next.is_none() {
            self.done = true;
        }
        if page.next.is_some() {
            self.cursor = page.next;
        }
        if page.rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(page.rows))
    }

    /// Drains every remaining page.
    pub async fn collect_all(mut self) -> Result<Vec<S::Row>> {
        let mut rows = Vec::new();
        while let Some(page) = self.next_page().await? {
            rows.extend(page);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Numbers {
        values: Vec<u32>,
        calls: AtomicUsize,
    }

    impl Numbers {
        fn new(n: u32) -> Self {
            Self {
                values: (1..=n).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PageSource for &Numbers {
        type Row = u32;

        async fn fetch_page(&self, after: Option<&str>, limit: usize) -> Result<Page<u32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let after: u32 = after.map(str::parse::<u32>).transpose()?.unwrap_or(0);
            let rows: Vec<u32> = self
                .values
                .iter()
                .copied()
                .filter(|v| *v > after)
                .take(limit)
                .collect();
            Ok(Page::from_rows(rows, |v| v.to_string()))
        }
    }

    #[tokio::test]
    async fn walks_until_short_page() {
        let source = Numbers::new(7);
        let mut pager = Pager::new(&source, 3);
        assert_eq!(pager.next_page().await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(pager.next_page().await.unwrap(), Some(vec![4, 5, 6]));
        assert_eq!(pager.next_page().await.unwrap(), Some(vec![7]));
        assert_eq!(pager.next_page().await.unwrap(), None);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exact_multiple_ends_with_empty_page() {
        let source = Numbers::new(4);
        let rows = Pager::new(&source, 2).collect_all().await.unwrap();
        assert_eq!(rows, vec![1, 2, 3, 4]);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn restarts_from_saved_cursor() {
        let source = Numbers::new(5);
        let mut pager = Pager::new(&source, 2);
        pager.next_page().await.unwrap();
        let saved = pager.cursor().map(str::to_string);
        assert_eq!(saved.as_deref(), Some("2"));

        let rest = Pager::starting_after(&source, saved, 2)
            .collect_all()
            .await
            .unwrap();
        assert_eq!(rest, vec![3, 4, 5]);
    }
}
