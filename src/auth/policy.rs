//! Repository authority model.
//!
//! Pure predicates answering who may read or write a repository.  Visibility
//! gates reading only; write authority is the same for public and private
//! repositories.

use crate::directory::Repository;

/// True if `viewer` may read `repository`.
///
/// Public repositories are readable by anyone, anonymous viewers included.
/// Private repositories are readable only by the owner and collaborators.
pub fn has_read_authority(
    repository: &Repository,
    viewer: Option<&str>,
    collaborators: &[String],
) -> bool {
    if repository.is_public {
        return true;
    }
    is_owner_or_collaborator(repository, viewer, collaborators)
}

/// True if `viewer` may write to `repository`: the owner and collaborators,
/// independent of visibility.
pub fn has_write_authority(
    repository: &Repository,
    viewer: Option<&str>,
    collaborators: &[String],
) -> bool {
    is_owner_or_collaborator(repository, viewer, collaborators)
}

fn is_owner_or_collaborator(
    repository: &Repository,
    viewer: Option<&str>,
    collaborators: &[String],
) -> bool {
    match viewer {
        Some(user) => {
            user == repository.id.owner || collaborators.iter().any(|c| c == user)
        }
        None => false,
    }
}
