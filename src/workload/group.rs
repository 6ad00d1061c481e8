use std::future::Future;

tokio::task_local! {
    static CURRENT_GROUP: String;
}

/// Group path of the running task, `::`-joined; empty outside any group.
pub fn current_group() -> String {
    CURRENT_GROUP
        .try_with(|g| g.clone())
        .unwrap_or_default()
}

/// Prefix used for request names inside a group (`"auth::login::"`).
pub fn current_group_prefix() -> String {
    let group = current_group();
    if group.is_empty() {
        group
    } else {
        format!("{}::", group)
    }
}

/// Run `fut` inside the named group. Groups nest; the path is restored when
/// `fut` completes or is dropped.
pub async fn group<F: Future>(name: &str, fut: F) -> F::Output {
    let parent = current_group();
    let path = if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}::{}", parent, name)
    };
    CURRENT_GROUP.scope(path, fut).await
}
