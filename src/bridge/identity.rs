use once_cell::sync::Lazy;
use regex::Regex;

use crate::discord::{GuildSnapshot, MemberSnapshot};

static IDENTITY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\w+#\d{4}").expect("identity pattern is valid"));

/// First `name#0000` identity embedded in free text, lowercased, or `None`.
pub fn find_identity(text: &str) -> Option<String> {
    IDENTITY_PATTERN
        .find(text)
        .map(|m| m.as_str().to_lowercase())
}

/// Canonical identity for a roster member: lowercased username plus the
/// zero-padded discriminator.
pub fn member_identity(username: &str, discriminator: u16) -> String {
    format!("{}#{:04}", username.to_lowercase(), discriminator)
}

/// Linear scan of every known guild for a member whose derived identity
/// matches `identity`.
pub fn find_member<'a>(
    guilds: &'a [GuildSnapshot],
    identity: &str,
) -> Option<(&'a GuildSnapshot, &'a MemberSnapshot)> {
    guilds.iter().find_map(|guild| {
        guild
            .members
            .iter()
            .find(|member| member.identity() == identity)
            .map(|member| (guild, member))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discord::RoleInfo;

    #[test]
    fn finds_identity_in_free_text() {
        assert_eq!(
            find_identity("thanks — alice#1234"),
            Some("alice#1234".to_string())
        );
    }

    #[test]
    fn identity_is_lowercased() {
        assert_eq!(
            find_identity("from Alice#1234 with love"),
            Some("alice#1234".to_string())
        );
    }

    #[test]
    fn first_match_wins() {
        assert_eq!(
            find_identity("alice#1234 and bob#5555"),
            Some("alice#1234".to_string())
        );
    }

    #[test]
    fn no_match_yields_none() {
        assert_eq!(find_identity("no discord tag here"), None);
        assert_eq!(find_identity("short#123 discriminator"), None);
        assert_eq!(find_identity(""), None);
    }

    #[test]
    fn member_identity_pads_discriminator() {
        assert_eq!(member_identity("Alice", 42), "alice#0042");
        assert_eq!(member_identity("bob", 5555), "bob#5555");
    }

    fn guild_with(name: &str, discriminator: u16) -> GuildSnapshot {
        GuildSnapshot {
            id: 1,
            name: "guild".to_string(),
            roles: vec![RoleInfo {
                id: 10,
                name: "Gold".to_string(),
            }],
            members: vec![MemberSnapshot {
                user_id: 100,
                username: name.to_string(),
                discriminator,
                role_ids: vec![],
            }],
        }
    }

    #[test]
    fn find_member_scans_all_guilds() {
        let guilds = vec![guild_with("alice", 1234), guild_with("bob", 5555)];
        let (_, member) = find_member(&guilds, "bob#5555").expect("bob should resolve");
        assert_eq!(member.username, "bob");
    }

    #[test]
    fn find_member_misses_unknown_identity() {
        let guilds = vec![guild_with("alice", 1234)];
        assert!(find_member(&guilds, "carol#9999").is_none());
    }
}
