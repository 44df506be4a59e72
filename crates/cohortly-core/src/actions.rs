//! Catalogue of the tracked action types.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionSource {
    /// In-app activity log, keyed by activity type.
    Activity,
    /// Imported analytics event table, keyed by event name.
    Imported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionSpec {
    /// Identifier as it appears in the source table.
    pub id: &'static str,
    /// snake_case fragment used in projected field names.
    pub field: &'static str,
    pub source: ActionSource,
}

const fn activity(id: &'static str, field: &'static str) -> ActionSpec {
    ActionSpec {
        id,
        field,
        source: ActionSource::Activity,
    }
}

const fn imported(id: &'static str, field: &'static str) -> ActionSpec {
    ActionSpec {
        id,
        field,
        source: ActionSource::Imported,
    }
}

/// Imported event that carries a session length instead of counting as a
/// core action.
pub const SESSION: ActionSpec = imported("Session", "session");

/// Every action that counts towards the core-action global buckets.
pub const CORE_ACTIONS: &[ActionSpec] = &[
    activity("followgroup", "follow"),
    activity("comment", "comment"),
    activity("winePostLike", "wine_post_like"),
    activity("commentLike", "comment_like"),
    imported("Activity feed scrolled", "activity_feed_scrolled"),
    imported("Notifications list scrolled", "notifications_scrolled"),
    imported("Wine log scrolled", "wine_log_scrolled"),
    imported("Wine wishlisted", "wine_wishlisted"),
    imported("Wine log searched", "wine_log_searched"),
    imported("Wine log sorted", "wine_log_sorted"),
    imported("Find friends begin", "find_friends_begin"),
    imported("Friend profile viewed", "friend_profile_viewed"),
    imported("Profile viewed", "profile_viewed"),
    imported("Share wine begin", "share_wine_begin"),
    imported("Buy wine begin", "buy_wine_begin"),
];

/// Core actions followed by [`SESSION`].
pub fn tracked_actions() -> impl Iterator<Item = &'static ActionSpec> {
    CORE_ACTIONS.iter().chain(std::iter::once(&SESSION))
}

pub fn ids_from(source: ActionSource) -> Vec<&'static str> {
    tracked_actions()
        .filter(|spec| spec.source == source)
        .map(|spec| spec.id)
        .collect()
}

pub fn find(id: &str) -> Option<&'static ActionSpec> {
    tracked_actions().find(|spec| spec.id == id)
}
