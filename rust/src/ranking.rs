use std::collections::HashMap;

use crate::presence::PresenceTracker;
use crate::state::{Contact, ContactSummary};

/// Order contacts for the sidebar: unread first, then online, then by name.
///
/// The sort is stable, so contacts that tie on every key keep the caller's order.
pub fn rank_contacts(
    contacts: &[Contact],
    presence: &PresenceTracker,
    unread: &HashMap<String, u32>,
) -> Vec<ContactSummary> {
    let mut ranked: Vec<ContactSummary> = contacts
        .iter()
        .map(|c| ContactSummary {
            peer: c.username.clone(),
            display_name: display_name(c),
            unread_count: unread.get(&c.username).copied().unwrap_or(0),
            online: presence.is_online(&c.username),
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.unread_count
            .cmp(&a.unread_count)
            .then_with(|| b.online.cmp(&a.online))
            .then_with(|| {
                a.display_name
                    .to_lowercase()
                    .cmp(&b.display_name.to_lowercase())
            })
    });
    ranked
}

fn display_name(contact: &Contact) -> String {
    contact
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(&contact.username)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(username: &str, display_name: Option<&str>) -> Contact {
        Contact {
            username: username.to_string(),
            display_name: display_name.map(str::to_string),
        }
    }

    fn peers(ranked: &[ContactSummary]) -> Vec<&str> {
        ranked.iter().map(|c| c.peer.as_str()).collect()
    }

    #[test]
    fn unread_beats_online_beats_name() {
        let contacts = vec![
            contact("dave", None),
            contact("carol", None),
            contact("bob", None),
            contact("alice", None),
        ];
        let mut presence = PresenceTracker::new();
        presence.set_online("carol");
        presence.set_online("bob");
        let unread = HashMap::from([("dave".to_string(), 1), ("bob".to_string(), 0)]);

        let ranked = rank_contacts(&contacts, &presence, &unread);
        assert_eq!(peers(&ranked), ["dave", "bob", "carol", "alice"]);
        assert_eq!(ranked[0].unread_count, 1);
        assert!(ranked[1].online);
    }

    #[test]
    fn display_name_falls_back_to_username() {
        let contacts = vec![contact("zz", Some("Aaron")), contact("bb", Some("  "))];
        let ranked = rank_contacts(&contacts, &PresenceTracker::new(), &HashMap::new());
        assert_eq!(peers(&ranked), ["zz", "bb"]);
        assert_eq!(ranked[1].display_name, "bb");
    }

    #[test]
    fn full_ties_keep_input_order() {
        let contacts = vec![contact("a2", Some("Sam")), contact("a1", Some("Sam"))];
        let ranked = rank_contacts(&contacts, &PresenceTracker::new(), &HashMap::new());
        assert_eq!(peers(&ranked), ["a2", "a1"]);
    }
}
