//! Fold the admin and user renderings of a templated manifest into one entry.

use appshelf_core::ApplicationEntry;
use tracing::info;

/// Separator between the admin and user variant of a resource requirement.
pub const DISJUNCTION: &str = "||";

fn either(admin: &str, user: &str) -> String {
    if admin == user { admin.to_string() } else { format!("{admin}{DISJUNCTION}{user}") }
}

/// Merge two renderings. Total: anything irreconcilable keeps the admin value.
pub fn merge(admin: &ApplicationEntry, user: &ApplicationEntry) -> ApplicationEntry {
    let mut out = admin.clone();
    let app = admin.name.as_str();

    out.required_memory = either(&admin.required_memory, &user.required_memory);
    out.required_disk = either(&admin.required_disk, &user.required_disk);
    out.required_cpu = either(&admin.required_cpu, &user.required_cpu);
    out.required_gpu = either(&admin.required_gpu, &user.required_gpu);

    if admin.middleware != user.middleware {
        info!(app, field = "middleware", "merge: admin and user views differ; keeping admin");
    }
    if admin.permission != user.permission {
        info!(app, field = "permission", "merge: admin and user views differ; keeping admin");
    }

    let (a, u) = (&admin.options, &user.options);
    if a.dependencies != u.dependencies {
        info!(app, field = "dependencies", "merge: admin and user views differ");
        if u.dependencies.len() > a.dependencies.len() {
            out.options.dependencies = u.dependencies.clone();
        }
    }
    if a.app_scope != u.app_scope {
        info!(app, field = "appScope", "merge: admin and user views differ");
        let cluster = |s: &Option<appshelf_core::AppScope>| s.as_ref().is_some_and(|s| s.cluster_scoped);
        if cluster(&a.app_scope) {
            out.options.app_scope = a.app_scope.clone();
        } else if cluster(&u.app_scope) {
            out.options.app_scope = u.app_scope.clone();
        }
    }
    if a.policies != u.policies {
        info!(app, field = "policies", "merge: admin and user views differ");
        for p in &u.policies {
            if !a.policies.iter().any(|x| x.entrance_name == p.entrance_name) {
                out.options.policies.push(p.clone());
            }
        }
    }
    if admin.entrances != user.entrances {
        info!(app, field = "entrances", "merge: admin and user views differ");
        for e in &user.entrances {
            if !admin.entrances.iter().any(|x| x.name == e.name) {
                out.entrances.push(e.clone());
            }
        }
    }
    out
}
