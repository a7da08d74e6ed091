//! Trade group creation rules
//!
//! A group is opened by a buyer about one product listing. The hub runs the
//! storage and notification steps; this module holds the pure rules.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use nestchat_protocol::{ChatMessage, GroupId, GroupRecord, Timestamp};
use nestchat_utils::{NestChatError, Result};

/// First message persisted in every new group, sent as the creator
pub const INITIAL_GREETING: &str = "Hi! I'm interested in your product.";

/// Request to open a group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGroup {
    pub name: String,
    pub members: Vec<String>,
    pub product_id: String,
    #[serde(default)]
    pub cover_image: String,
}

/// Whether two member lists hold the same identities, ignoring order
///
/// Duplicates count: `[a, a, b]` and `[a, b, b]` differ.
pub fn same_members(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut counts: HashMap<&str, i64> = HashMap::new();
    for m in a {
        *counts.entry(m.as_str()).or_insert(0) += 1;
    }
    for m in b {
        let count = counts.entry(m.as_str()).or_insert(0);
        *count -= 1;
        if *count < 0 {
            return false;
        }
    }
    true
}

/// Validate a request and build the record to insert
///
/// The creator becomes the buyer and is added to the members if missing;
/// the first other member becomes the seller.
pub fn prepare_group(creator: &str, request: NewGroup, now: Timestamp) -> Result<GroupRecord> {
    let NewGroup {
        name,
        mut members,
        product_id,
        cover_image,
    } = request;

    if members.len() == 1 && members[0] == creator {
        return Err(NestChatError::SelfChat);
    }
    if !members.iter().any(|m| m == creator) {
        members.push(creator.to_string());
    }
    if product_id.trim().is_empty() {
        return Err(NestChatError::InvalidGroup("a product is required".into()));
    }

    let seller = members
        .iter()
        .find(|m| m.as_str() != creator)
        .cloned()
        .ok_or(NestChatError::SelfChat)?;

    Ok(GroupRecord {
        id: GroupId::generate(),
        name,
        members,
        product_id,
        cover_image,
        created_at: now,
        last_message_at: Some(now),
        read_status: BTreeMap::new(),
        buyer: creator.to_string(),
        seller,
        buyer_confirmed: false,
        seller_confirmed: false,
    })
}

/// An existing group for the same product with the same members
pub fn find_duplicate<'a>(existing: &'a [GroupRecord], members: &[String]) -> Option<&'a GroupRecord> {
    existing.iter().find(|g| same_members(&g.members, members))
}

/// The greeting message stored with a new group
pub fn greeting(group: &GroupRecord) -> ChatMessage {
    ChatMessage {
        group_id: group.id,
        sender_email: group.buyer.clone(),
        content: INITIAL_GREETING.to_string(),
        timestamp: group.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn request(members: &[&str]) -> NewGroup {
        NewGroup {
            name: "Road bike".into(),
            members: strings(members),
            product_id: "prod-1".into(),
            cover_image: "https://img/1.jpg".into(),
        }
    }

    #[test]
    fn test_same_members_ignores_order() {
        assert!(same_members(&strings(&["a", "b"]), &strings(&["b", "a"])));
        assert!(!same_members(&strings(&["a", "b"]), &strings(&["a", "c"])));
        assert!(!same_members(&strings(&["a"]), &strings(&["a", "a"])));
        assert!(!same_members(&strings(&["a", "a", "b"]), &strings(&["a", "b", "b"])));
        assert!(same_members(&[], &[]));
    }

    #[test]
    fn test_prepare_adds_creator_and_picks_seller() {
        let now = Utc::now();
        let group = prepare_group("buyer@x.com", request(&["seller@x.com"]), now).unwrap();

        assert_eq!(group.members, strings(&["seller@x.com", "buyer@x.com"]));
        assert_eq!(group.buyer, "buyer@x.com");
        assert_eq!(group.seller, "seller@x.com");
        assert_eq!(group.created_at, now);
        assert_eq!(group.last_message_at, Some(now));
        assert!(!group.buyer_confirmed && !group.seller_confirmed);
    }

    #[test]
    fn test_prepare_keeps_creator_position() {
        let group = prepare_group(
            "buyer@x.com",
            request(&["buyer@x.com", "seller@x.com"]),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(group.members.len(), 2);
        assert_eq!(group.seller, "seller@x.com");
    }

    #[test]
    fn test_prepare_rejects_self_chat() {
        let err = prepare_group("me@x.com", request(&["me@x.com"]), Utc::now()).unwrap_err();
        assert!(matches!(err, NestChatError::SelfChat));

        let err = prepare_group("me@x.com", request(&[]), Utc::now()).unwrap_err();
        assert!(matches!(err, NestChatError::SelfChat));
    }

    #[test]
    fn test_prepare_rejects_missing_product() {
        // Blank ids are treated like missing ones
        for product_id in ["", "  "] {
            let mut req = request(&["seller@x.com"]);
            req.product_id = product_id.into();
            let err = prepare_group("buyer@x.com", req, Utc::now()).unwrap_err();
            assert!(matches!(err, NestChatError::InvalidGroup(_)));
        }
    }

    #[test]
    fn test_new_group_request_shape() {
        let req: NewGroup = serde_json::from_str(
            r#"{"name":"Road bike","members":["s@x.com"],"product_id":"prod-1"}"#,
        )
        .unwrap();
        assert_eq!(req.members, strings(&["s@x.com"]));
        assert!(req.cover_image.is_empty());
    }

    #[test]
    fn test_find_duplicate() {
        let existing = prepare_group("b@x.com", request(&["s@x.com"]), Utc::now()).unwrap();
        let groups = vec![existing.clone()];

        let dup = find_duplicate(&groups, &strings(&["b@x.com", "s@x.com"]));
        assert_eq!(dup.map(|g| g.id), Some(existing.id));
        assert!(find_duplicate(&groups, &strings(&["c@x.com", "s@x.com"])).is_none());
    }

    #[test]
    fn test_greeting_comes_from_buyer() {
        let group = prepare_group("b@x.com", request(&["s@x.com"]), Utc::now()).unwrap();
        let msg = greeting(&group);
        assert_eq!(msg.sender_email, "b@x.com");
        assert_eq!(msg.group_id, group.id);
        assert_eq!(msg.content, INITIAL_GREETING);
    }
}
