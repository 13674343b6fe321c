//! Paginated search results.
//!
//! A [`Page`] holds one batch of results and, if more exist, a function that
//! fetches the next page. Nothing is fetched until asked for, and dropping a
//! page never affects the search: any page can be kept and its successor
//! fetched again later.

use std::fmt;
use std::sync::Arc;

use crate::error::PulpError;

/// Fetches the page following the current one.
pub type PageFetch<T> = Arc<dyn Fn() -> Result<Page<T>, PulpError> + Send + Sync>;

/// One page of search results.
pub struct Page<T> {
    pub data: Vec<T>,
    next: Option<PageFetch<T>>,
}

impl<T: Clone> Clone for Page<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            next: self.next.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Page<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("data", &self.data)
            .field("has_next", &self.next.is_some())
            .finish()
    }
}

impl<T: Send + Sync + 'static> Page<T> {
    pub fn new(data: Vec<T>, next: Option<PageFetch<T>>) -> Self {
        Self { data, next }
    }

    /// A page with no successor.
    pub fn last(data: Vec<T>) -> Self {
        Self { data, next: None }
    }

    #[must_use]
    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }

    /// Fetches the next page, if there is one.
    #[must_use]
    pub fn next_page(&self) -> Option<Result<Self, PulpError>> {
        self.next.as_ref().map(|fetch| fetch())
    }

    /// Collects this and all following pages.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while fetching a page.
    pub fn all(self) -> Result<Vec<T>, PulpError> {
        self.into_iter().collect()
    }

    /// Splits an in-memory result list into pages of `size`.
    pub fn chunked(items: Vec<T>, size: usize) -> Self
    where
        T: Clone,
    {
        Self::chunk_from(Arc::new(items), 0, size.max(1))
    }

    fn chunk_from(items: Arc<Vec<T>>, start: usize, size: usize) -> Self
    where
        T: Clone,
    {
        let end = (start + size).min(items.len());
        let data = items.get(start..end).map(<[T]>::to_vec).unwrap_or_default();
        let next = (end < items.len()).then(|| {
            Arc::new(move || Ok(Self::chunk_from(Arc::clone(&items), end, size))) as PageFetch<T>
        });
        Self { data, next }
    }

    /// Pages over several offset-addressed result sets in sequence.
    ///
    /// `fetch(segment, skip, limit)` returns up to `limit` results of
    /// `segment` starting at `skip`. A short batch ends a segment.
    ///
    /// # Errors
    ///
    /// Returns the error from fetching the first page.
    pub fn by_offset<F>(segments: usize, limit: usize, fetch: F) -> Result<Self, PulpError>
    where
        F: Fn(usize, usize, usize) -> Result<Vec<T>, PulpError> + Send + Sync + 'static,
    {
        if segments == 0 {
            return Ok(Self::last(Vec::new()));
        }
        Self::offset_from(Arc::new(fetch), segments, 0, 0, limit.max(1))
    }

    fn offset_from<F>(
        fetch: Arc<F>,
        segments: usize,
        segment: usize,
        skip: usize,
        limit: usize,
    ) -> Result<Self, PulpError>
    where
        F: Fn(usize, usize, usize) -> Result<Vec<T>, PulpError> + Send + Sync + 'static,
    {
        let data = fetch(segment, skip, limit)?;
        let following = if data.len() >= limit {
            Some((segment, skip + limit))
        } else if segment + 1 < segments {
            Some((segment + 1, 0))
        } else {
            None
        };
        let next = following.map(|(segment, skip)| {
            Arc::new(move || Self::offset_from(Arc::clone(&fetch), segments, segment, skip, limit))
                as PageFetch<T>
        });
        Ok(Self { data, next })
    }
}

/// Iterator over every result of a page and its successors.
pub struct PageIter<T> {
    current: std::vec::IntoIter<T>,
    next: Option<PageFetch<T>>,
}

impl<T> Iterator for PageIter<T> {
    type Item = Result<T, PulpError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.current.next() {
                return Some(Ok(item));
            }
            let fetch = self.next.take()?;
            match fetch() {
                Ok(page) => {
                    self.current = page.data.into_iter();
                    self.next = page.next;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl<T> IntoIterator for Page<T> {
    type Item = Result<T, PulpError>;
    type IntoIter = PageIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        PageIter {
            current: self.data.into_iter(),
            next: self.next,
        }
    }
}
