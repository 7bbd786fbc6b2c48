use std::collections::HashSet;

/// Identifier bookkeeping for one crawl run.
///
/// `seen_articles` is scoped to the category being harvested and must be reset
/// with [`RunState::begin_category`]; author ids accumulate for the whole run.
#[derive(Debug, Default)]
pub struct RunState {
    existing_articles: HashSet<u64>,
    existing_authors: HashSet<u64>,
    seen_articles: HashSet<u64>,
    seen_authors: HashSet<u64>,
}

impl RunState {
    pub fn new(
        existing_articles: impl IntoIterator<Item = u64>,
        existing_authors: impl IntoIterator<Item = u64>,
    ) -> Self {
        Self {
            existing_articles: existing_articles.into_iter().collect(),
            existing_authors: existing_authors.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn begin_category(&mut self) {
        self.seen_articles.clear();
    }

    /// Marks an article id as seen in the current category. Returns `false` if
    /// it was already seen.
    pub fn claim_article(&mut self, id: u64) -> bool {
        self.seen_articles.insert(id)
    }

    /// An article is novel unless its id is already stored.
    pub fn is_novel_article(&self, id: u64) -> bool {
        !self.existing_articles.contains(&id)
    }

    /// Returns `true` for an author id that is neither stored nor already
    /// claimed in this run, and claims it.
    pub fn claim_author(&mut self, id: u64) -> bool {
        !self.existing_authors.contains(&id) && self.seen_authors.insert(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unstored_ids_are_novel() {
        let state = RunState::new([1, 2, 3], []);
        let novel: Vec<u64> = [2, 3, 4]
            .into_iter()
            .filter(|id| state.is_novel_article(*id))
            .collect();
        assert_eq!(novel, vec![4]);
    }

    #[test]
    fn article_claims_reset_per_category() {
        let mut state = RunState::default();
        assert!(state.claim_article(10));
        assert!(!state.claim_article(10));

        state.begin_category();
        assert!(state.claim_article(10));
    }

    #[test]
    fn authors_are_claimed_once_per_run() {
        let mut state = RunState::new([], [5]);
        assert!(!state.claim_author(5));
        assert!(state.claim_author(6));
        assert!(!state.claim_author(6));

        state.begin_category();
        assert!(!state.claim_author(6));
    }
}
