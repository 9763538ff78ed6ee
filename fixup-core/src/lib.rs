pub mod patch;
pub mod policy;
pub mod signature;
pub mod suggestion;

pub use patch::{apply_edit, reconstruct_patch, ChangeSet, PatchError};
pub use policy::{
    PolicyError, RepositoryPolicy, TrustedIdentities, DEFAULT_BOT_IDENTITY,
    DEFAULT_PRIMARY_BRANCH, POLICY_PATH,
};
pub use signature::{sign_payload, verify_signature, SIGNATURE_PREFIX};
pub use suggestion::{parse_suggestions, SuggestionEdit};

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

fn short_hash(hash: &str) -> String {
    if hash.len() >= 8 {
        hash[..8].to_string()
    } else {
        hash.to_string()
    }
}

pub fn get_bot_version() -> String {
    // An explicit hash from the packaging environment wins over the one
    // detected by `built` at compile time.
    if let Some(git_hash) = option_env!("FIXUP_GIT_HASH") {
        short_hash(git_hash)
    } else if let Some(git_hash) = built_info::GIT_COMMIT_HASH {
        short_hash(git_hash)
    } else {
        built_info::PKG_VERSION.to_string()
    }
}
