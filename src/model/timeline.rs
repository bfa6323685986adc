use serde::{Deserialize, Serialize};

use super::uint_range::{ranges_contain, UintRange};

/// A value that applies during a set of timeline times.
pub trait Timeline {
    fn timeline_times(&self) -> &[UintRange];
}

/// Returns the entry active at `time`, if any.
pub fn active_at<T: Timeline>(timeline: &[T], time: u64) -> Option<&T> {
    timeline
        .iter()
        .find(|entry| ranges_contain(entry.timeline_times(), time))
}

macro_rules! timeline_entry {
    ($name:ident { $($field:ident : $ty:ty),+ $(,)? }) => {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub struct $name {
            #[serde(default)]
            pub timeline_times: Vec<UintRange>,
            $(#[serde(default)] pub $field: $ty,)+
        }

        impl Timeline for $name {
            fn timeline_times(&self) -> &[UintRange] {
                &self.timeline_times
            }
        }
    };
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionMetadata {
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub custom_data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeMetadata {
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub custom_data: String,
    #[serde(default)]
    pub badge_ids: Vec<UintRange>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffChainBalancesMetadata {
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub custom_data: String,
}

timeline_entry!(ManagerTimeline { manager: String });
timeline_entry!(CollectionMetadataTimeline {
    collection_metadata: CollectionMetadata
});
timeline_entry!(BadgeMetadataTimeline {
    badge_metadata: Vec<BadgeMetadata>
});
timeline_entry!(OffChainBalancesMetadataTimeline {
    off_chain_balances_metadata: OffChainBalancesMetadata
});
timeline_entry!(CustomDataTimeline { custom_data: String });
timeline_entry!(StandardsTimeline {
    standards: Vec<String>
});
timeline_entry!(IsArchivedTimeline { is_archived: bool });

/// Collection-level transferability rule. Only the fields the indexer keys
/// trackers on are typed; the criteria stay opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionApproval {
    #[serde(default)]
    pub approval_id: String,
    #[serde(default)]
    pub from_list_id: String,
    #[serde(default)]
    pub to_list_id: String,
    #[serde(default)]
    pub initiated_by_list_id: String,
    #[serde(default)]
    pub transfer_times: Vec<UintRange>,
    #[serde(default)]
    pub badge_ids: Vec<UintRange>,
    #[serde(default)]
    pub ownership_times: Vec<UintRange>,
    #[serde(default)]
    pub approval_criteria: serde_json::Value,
}
