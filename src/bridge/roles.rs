use crate::discord::{GuildSnapshot, MemberSnapshot, RoleInfo};

/// Minimal set of role mutations that leaves a member holding exactly the
/// desired tier role (or none). Roles whose names are not configured tiers are
/// never touched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RolePlan {
    pub add: Option<RoleInfo>,
    pub remove: Vec<RoleInfo>,
    /// Desired role was already held, so no add is issued.
    pub already_held: bool,
}

/// Diffs the member's current tier roles against the desired one.
///
/// A member holds at most one tier role, so every currently held tier role
/// other than the desired one is queued for removal.
pub fn plan_role_change(
    tier_names: &[String],
    guild: &GuildSnapshot,
    member: &MemberSnapshot,
    desired: Option<&RoleInfo>,
) -> RolePlan {
    let held_tier_roles: Vec<RoleInfo> = member
        .role_ids
        .iter()
        .filter_map(|role_id| guild.roles.iter().find(|role| role.id == *role_id))
        .filter(|role| tier_names.contains(&role.name))
        .cloned()
        .collect();

    match desired {
        Some(role) if held_tier_roles.iter().any(|held| held.id == role.id) => RolePlan {
            add: None,
            remove: held_tier_roles
                .into_iter()
                .filter(|held| held.id != role.id)
                .collect(),
            already_held: true,
        },
        Some(role) => RolePlan {
            add: Some(role.clone()),
            remove: held_tier_roles,
            already_held: false,
        },
        None => RolePlan {
            add: None,
            remove: held_tier_roles,
            already_held: false,
        },
    }
}

/// Exact-name lookup in the guild's role catalog.
pub fn role_by_name<'a>(guild: &'a GuildSnapshot, name: &str) -> Option<&'a RoleInfo> {
    guild.roles.iter().find(|role| role.name == name)
}
