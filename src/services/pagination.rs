// Page arithmetic for list endpoints

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Pagination<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub pages: u32,
    pub has_prev: bool,
    pub has_next: bool,
    pub prev_num: Option<u32>,
    pub next_num: Option<u32>,
    /// Page links to render; `None` is a gap
    pub page_links: Vec<Option<u32>>,
}

impl<T> Pagination<T> {
    pub fn new(items: Vec<T>, page: u32, per_page: u32, total: u64) -> Self {
        let pages = if per_page > 0 {
            total.div_ceil(per_page as u64) as u32
        } else {
            0
        };
        let has_prev = page > 1;
        let has_next = page < pages;
        let page_links = iter_pages(page, pages, 2, 2, 5, 2);

        Self {
            items,
            page,
            per_page,
            total,
            pages,
            has_prev,
            has_next,
            prev_num: has_prev.then(|| page - 1),
            next_num: has_next.then(|| page + 1),
            page_links,
        }
    }

    /// Row offset for a 1-based page
    pub fn offset(page: u32, per_page: u32) -> i64 {
        (page.max(1) as i64 - 1) * per_page as i64
    }
}

/// Page numbers near the edges and around the current page
pub fn iter_pages(
    page: u32,
    pages: u32,
    left_edge: u32,
    left_current: u32,
    right_current: u32,
    right_edge: u32,
) -> Vec<Option<u32>> {
    let mut out = Vec::new();
    let mut last = 0;
    let page = page as i64;

    for num in 1..=pages {
        let n = num as i64;
        let near_current = n > page - left_current as i64 - 1 && n < page + right_current as i64;
        if num <= left_edge || near_current || n > pages as i64 - right_edge as i64 {
            if last + 1 != num {
                out.push(None);
            }
            out.push(Some(num));
            last = num;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_counts() {
        let p = Pagination::new(vec![1, 2, 3], 1, 3, 7);
        assert_eq!(p.pages, 3);
        assert!(!p.has_prev);
        assert!(p.has_next);
        assert_eq!(p.prev_num, None);
        assert_eq!(p.next_num, Some(2));

        let last = Pagination::new(vec![7], 3, 3, 7);
        assert!(last.has_prev);
        assert!(!last.has_next);

        let empty: Pagination<i32> = Pagination::new(vec![], 1, 20, 0);
        assert_eq!(empty.pages, 0);
        assert!(empty.page_links.is_empty());
        assert_eq!(Pagination::<i32>::offset(3, 20), 40);
    }

    #[test]
    fn test_iter_pages_gaps() {
        let links = iter_pages(10, 20, 2, 2, 5, 2);
        let expected = vec![
            Some(1),
            Some(2),
            None,
            Some(8),
            Some(9),
            Some(10),
            Some(11),
            Some(12),
            Some(13),
            Some(14),
            None,
            Some(19),
            Some(20),
        ];
        assert_eq!(links, expected);

        let short = iter_pages(1, 4, 2, 2, 5, 2);
        assert_eq!(short, vec![Some(1), Some(2), Some(3), Some(4)]);
    }
}
