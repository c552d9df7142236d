//! Publication-thread tracker: maps a publication to the chat message that
//! started its thread so later verification results can reply in place.

use pactbot_events::ThreadKey;

use crate::{AggregatorState, ThreadInfo};

impl AggregatorState {
    /// Full-replace upsert. Entries sharing provider, consumer, branch and
    /// channel but pointing at another pact version are pruned. Returns the
    /// number of pruned entries.
    pub fn upsert_thread_info(&mut self, key: &ThreadKey, info: ThreadInfo) -> usize {
        let rendered = key.to_string();
        let before = self.publication_threads.len();
        self.publication_threads.retain(|existing, _| {
            if *existing == rendered {
                return true;
            }
            match ThreadKey::parse(existing) {
                Some(parsed) => !parsed.same_lineage(key),
                None => true,
            }
        });
        let pruned = before - self.publication_threads.len();
        self.publication_threads.insert(rendered, info);
        pruned
    }

    pub fn thread_info(&self, key: &ThreadKey) -> Option<&ThreadInfo> {
        self.publication_threads.get(&key.to_string())
    }
}
