use chrono::{DateTime, Utc};
use shared::domain::{Role, UserRecord};

use crate::{SessionPhase, SessionSnapshot};

/// Everything the front-end needs to paint one frame. Produced only by
/// [`render`], which is a pure function of the session snapshot, so painting
/// twice with unchanged state yields an identical view.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewModel {
    /// Elements tagged authenticated-only (dashboard link, logout control).
    pub authenticated_visible: bool,
    /// Elements tagged anonymous-only (login/register links).
    pub anonymous_visible: bool,
    pub admin_section_visible: bool,
    pub user_info: Option<UserInfoView>,
    pub user_rows: Vec<UserRowView>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserInfoView {
    pub username: String,
    pub role: Role,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserRowView {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub created_at: Option<DateTime<Utc>>,
    /// The role an admin viewer may switch this user to. Absent for the
    /// viewer's own row and for non-admin viewers.
    pub role_toggle: Option<Role>,
}

pub fn render(snapshot: &SessionSnapshot) -> ViewModel {
    let authenticated = snapshot.phase != SessionPhase::Anonymous;
    let viewer = snapshot.user.as_ref();
    let viewer_is_admin = viewer.is_some_and(|user| user.role == Role::Admin);

    let user_rows = snapshot
        .roster
        .iter()
        .map(|user| user_row(user, viewer, viewer_is_admin))
        .collect();

    ViewModel {
        authenticated_visible: authenticated,
        anonymous_visible: !authenticated,
        admin_section_visible: viewer_is_admin,
        user_info: viewer.map(|user| UserInfoView {
            username: user.username.clone(),
            role: user.role,
            email: user.email.clone(),
        }),
        user_rows,
    }
}

fn user_row(user: &UserRecord, viewer: Option<&UserRecord>, viewer_is_admin: bool) -> UserRowView {
    let is_self = viewer.map(|viewer| viewer.id) == Some(user.id);
    UserRowView {
        id: user.id.0,
        username: user.username.clone(),
        email: user.email.clone(),
        role: user.role,
        created_at: user.created_at,
        role_toggle: (viewer_is_admin && !is_self).then(|| user.role.toggled()),
    }
}
