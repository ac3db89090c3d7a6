//! Login and access checks performed before any file work begins.

use crate::config::Credentials;
use crate::error::{DeliveryError, DeliveryResult};
use crate::store::{MetadataStore, PasswordSettings, Project, Role, User};
use argon2::{Algorithm, Argon2, Params, Version};
use std::fmt;
use tracing::info;

/// Hash length produced by [`hash_password`].
pub const HASH_LEN: usize = 32;

/// Delivery storage option a project must use.
pub const DELIVERY_OPTION_S3: &str = "S3";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Put,
    Get,
    List,
    Remove,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::Put => "put",
            Direction::Get => "get",
            Direction::List => "ls",
            Direction::Remove => "rm",
        };
        f.write_str(name)
    }
}

/// An authenticated user's access to one project.
#[derive(Clone, Debug)]
pub struct Grant {
    pub user: User,
    pub project: Project,
    pub direction: Direction,
}

impl Grant {
    pub fn project_id(&self) -> &str {
        &self.project.id
    }

    pub fn owner(&self) -> &str {
        self.project.owner.as_deref().unwrap_or_default()
    }
}

/// Resolves credentials to a project grant for `direction`.
pub async fn authenticate(
    store: &dyn MetadataStore,
    credentials: &Credentials,
    direction: Direction,
) -> DeliveryResult<Grant> {
    let (username, password, project_id) = credentials.require_login()?;
    let stated_owner = match direction {
        Direction::Put => Some(credentials.require_owner()?),
        _ => None,
    };

    let user = store
        .user_by_username(username)
        .await?
        .ok_or_else(|| DeliveryError::Access(format!("user {username} does not exist")))?;

    if !verify_password(password, &user.password_hash, &user.password_settings)? {
        return Err(DeliveryError::Access("incorrect password".to_string()));
    }

    if !role_permits(user.role, direction) {
        return Err(DeliveryError::Access(format!(
            "a {} user may not perform {direction}",
            role_name(user.role)
        )));
    }

    let project = store
        .project(project_id)
        .await?
        .ok_or_else(|| DeliveryError::Access(format!("project {project_id} does not exist")))?;

    if !user.projects.iter().any(|p| p == project_id) {
        return Err(DeliveryError::Access(format!(
            "user {username} has no access to project {project_id}"
        )));
    }

    let owner = project
        .owner
        .as_deref()
        .ok_or_else(|| DeliveryError::Access(format!("project {project_id} has no owner")))?;

    match direction {
        Direction::Put => {
            let stated = stated_owner.unwrap_or_default();
            if stated != owner {
                return Err(DeliveryError::Access(format!(
                    "{stated} is not the owner of project {project_id}"
                )));
            }
            if owner == user.id || owner == user.username {
                return Err(DeliveryError::Access(
                    "the uploader cannot be the project owner".to_string(),
                ));
            }
        }
        Direction::Get => {
            if owner != user.id && owner != user.username {
                return Err(DeliveryError::Access(format!(
                    "user {username} is not the owner of project {project_id}"
                )));
            }
        }
        Direction::List | Direction::Remove => {}
    }

    if project.delivery_option != DELIVERY_OPTION_S3 {
        return Err(DeliveryError::Access(format!(
            "project {project_id} does not use {DELIVERY_OPTION_S3} delivery"
        )));
    }

    let key_missing = match direction {
        Direction::Put => project.keys.public.is_none(),
        Direction::Get => project.keys.private.is_none(),
        Direction::List | Direction::Remove => false,
    };
    if key_missing {
        return Err(DeliveryError::Access(format!(
            "project {project_id} has no encryption keys for {direction}"
        )));
    }

    info!("user {username} authenticated for {direction} on project {project_id}");
    Ok(Grant {
        user,
        project,
        direction,
    })
}

fn role_permits(role: Role, direction: Direction) -> bool {
    match direction {
        Direction::Put | Direction::Remove => role == Role::Facility,
        Direction::Get => role == Role::Researcher,
        Direction::List => true,
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::Facility => "facility",
        Role::Researcher => "researcher",
    }
}

fn argon2_for(settings: &PasswordSettings, output_len: usize) -> DeliveryResult<Argon2<'static>> {
    let params = Params::new(
        settings.m_cost,
        settings.t_cost,
        settings.p_cost,
        Some(output_len),
    )
    .map_err(|e| DeliveryError::Access(format!("invalid password settings: {e}")))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

fn derive(password: &str, settings: &PasswordSettings, output_len: usize) -> DeliveryResult<Vec<u8>> {
    let salt = hex::decode(&settings.salt)
        .map_err(|e| DeliveryError::Access(format!("invalid password salt: {e}")))?;
    let mut out = vec![0u8; output_len];
    argon2_for(settings, output_len)?
        .hash_password_into(password.as_bytes(), &salt, &mut out)
        .map_err(|e| DeliveryError::Access(format!("password hashing failed: {e}")))?;
    Ok(out)
}

/// Hex-encoded Argon2id hash of `password` under `settings`.
pub fn hash_password(password: &str, settings: &PasswordSettings) -> DeliveryResult<String> {
    derive(password, settings, HASH_LEN).map(hex::encode)
}

pub fn verify_password(
    password: &str,
    stored_hash: &str,
    settings: &PasswordSettings,
) -> DeliveryResult<bool> {
    let expected = hex::decode(stored_hash)
        .map_err(|e| DeliveryError::Access(format!("invalid stored password hash: {e}")))?;
    if expected.is_empty() {
        return Ok(false);
    }
    let actual = derive(password, settings, expected.len())?;

    // Compare without early exit.
    let diff = actual
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));
    Ok(diff == 0)
}
