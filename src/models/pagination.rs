//! Page arithmetic shared by list endpoints

use crate::config::PaginationConfig;

/// Normalized page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: i64,
    pub per_page: i64,
}

impl Page {
    /// Clamp raw query values: page >= 1, 1 <= per_page <= max
    pub fn new(page: Option<i64>, per_page: Option<i64>, config: &PaginationConfig) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page
                .unwrap_or(config.default_per_page)
                .clamp(1, config.max_per_page.max(1)),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.per_page)
    }

    pub fn limit(&self) -> i64 {
        self.per_page
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let page = Page::new(None, None, &PaginationConfig::default());
        assert_eq!(page, Page { page: 1, per_page: 20 });
        assert_eq!(page.offset(), 0);
    }

    #[test]
    fn test_clamping() {
        let config = PaginationConfig::default();
        let page = Page::new(Some(0), Some(1000), &config);
        assert_eq!(page, Page { page: 1, per_page: 100 });

        let page = Page::new(Some(3), Some(-5), &config);
        assert_eq!(page.per_page, 1);
        assert_eq!(page.offset(), 2);

        let page = Page::new(Some(i64::MAX), Some(100), &config);
        assert_eq!(page.page, i64::MAX);
        assert_eq!(page.offset(), i64::MAX);
    }
}
