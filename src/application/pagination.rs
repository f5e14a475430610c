//! Page-number pagination shared by every feed.
//!
//! Feeds are addressed by a 1-indexed `?page=` query parameter. A page number
//! past the end of the scope is an error the HTTP layer turns into a 404, not
//! an empty page. An empty scope still has exactly one (empty) page.

use std::num::NonZeroU32;

use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_PAGE_SIZE: u32 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PageError {
    #[error("page number `{raw}` is not a positive integer")]
    Invalid { raw: String },
    #[error("page {requested} is out of range (last page is {last})")]
    OutOfRange { requested: u32, last: u32 },
}

/// A validated, 1-indexed page number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageNumber(u32);

impl PageNumber {
    pub const FIRST: PageNumber = PageNumber(1);

    pub fn new(value: u32) -> Option<Self> {
        (value >= 1).then_some(Self(value))
    }

    /// Parse the raw `?page=` value. An absent parameter means the first page;
    /// anything that is not a positive integer is rejected.
    pub fn parse(raw: Option<&str>) -> Result<Self, PageError> {
        match raw {
            None => Ok(Self::FIRST),
            Some(text) => {
                let trimmed = text.trim();
                trimmed
                    .parse::<u32>()
                    .ok()
                    .and_then(Self::new)
                    .ok_or_else(|| PageError::Invalid {
                        raw: trimmed.to_string(),
                    })
            }
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Offset of the first row on this page.
    pub fn offset(self, size: NonZeroU32) -> u64 {
        u64::from(self.0 - 1) * u64::from(size.get())
    }
}

/// Number of pages a scope with `total_items` rows occupies. Never zero.
pub fn total_pages(total_items: u64, size: NonZeroU32) -> u32 {
    let size = u64::from(size.get());
    let pages = total_items.div_ceil(size).max(1);
    u32::try_from(pages).unwrap_or(u32::MAX)
}

/// One page of a feed, with enough bookkeeping to render a pager.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub number: u32,
    pub size: u32,
    pub total_items: u64,
    pub total_pages: u32,
}

impl<T> Page<T> {
    /// Assemble a page from rows already sliced by the repository. Fails when
    /// the requested number lies past the last page.
    pub fn assemble(
        items: Vec<T>,
        number: PageNumber,
        size: NonZeroU32,
        total_items: u64,
    ) -> Result<Self, PageError> {
        let total_pages = total_pages(total_items, size);
        if number.get() > total_pages {
            return Err(PageError::OutOfRange {
                requested: number.get(),
                last: total_pages,
            });
        }
        Ok(Self {
            items,
            number: number.get(),
            size: size.get(),
            total_items,
            total_pages,
        })
    }

    pub fn has_previous(&self) -> bool {
        self.number > 1
    }

    pub fn has_next(&self) -> bool {
        self.number < self.total_pages
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            number: self.number,
            size: self.size,
            total_items: self.total_items,
            total_pages: self.total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    #[test]
    fn absent_parameter_means_first_page() {
        assert_eq!(PageNumber::parse(None).unwrap(), PageNumber::FIRST);
    }

    #[test]
    fn parses_positive_integers() {
        assert_eq!(PageNumber::parse(Some("3")).unwrap().get(), 3);
        assert_eq!(PageNumber::parse(Some(" 12 ")).unwrap().get(), 12);
    }

    #[test]
    fn rejects_zero_negative_and_garbage() {
        for raw in ["0", "-1", "abc", "1.5", ""] {
            assert!(matches!(
                PageNumber::parse(Some(raw)),
                Err(PageError::Invalid { .. })
            ));
        }
    }

    #[test]
    fn fourteen_items_split_ten_and_four() {
        assert_eq!(total_pages(14, size(10)), 2);

        let first = Page::assemble(vec![0u8; 10], PageNumber::FIRST, size(10), 14).unwrap();
        assert_eq!(first.items.len(), 10);
        assert!(!first.has_previous());
        assert!(first.has_next());

        let second =
            Page::assemble(vec![0u8; 4], PageNumber::new(2).unwrap(), size(10), 14).unwrap();
        assert_eq!(second.items.len(), 4);
        assert!(second.has_previous());
        assert!(!second.has_next());
    }

    #[test]
    fn page_past_the_end_is_out_of_range() {
        let err = Page::<u8>::assemble(vec![], PageNumber::new(3).unwrap(), size(10), 14)
            .unwrap_err();
        assert_eq!(
            err,
            PageError::OutOfRange {
                requested: 3,
                last: 2
            }
        );
    }

    #[test]
    fn empty_scope_has_one_empty_page() {
        assert_eq!(total_pages(0, size(10)), 1);
        let page = Page::<u8>::assemble(vec![], PageNumber::FIRST, size(10), 0).unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total_pages, 1);
        assert!(!page.has_previous());
        assert!(!page.has_next());
    }

    #[test]
    fn exact_multiple_has_no_phantom_page() {
        assert_eq!(total_pages(20, size(10)), 2);
        assert!(Page::<u8>::assemble(vec![], PageNumber::new(3).unwrap(), size(10), 20).is_err());
    }

    #[test]
    fn offsets_advance_by_page_size() {
        assert_eq!(PageNumber::FIRST.offset(size(10)), 0);
        assert_eq!(PageNumber::new(3).unwrap().offset(size(10)), 20);
    }
}
