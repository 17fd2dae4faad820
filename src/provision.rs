//! Maintenance commands for the storage buckets and their access policies.

use crate::backend::{Backend, BackendResult, Bucket, Credential};
use crate::uploads::{BucketPolicy, BUCKETS};

/// Drop-then-create, since `CREATE POLICY` has no `IF NOT EXISTS`.
fn replace_policy(name: &str, body: &str) -> String {
    format!(
        "DROP POLICY IF EXISTS \"{name}\" ON storage.objects;\nCREATE POLICY \"{name}\"\n  ON storage.objects {body};\n"
    )
}

/// Public read for the bucket, and owner-only writes where the owner is the
/// first path segment.
fn bucket_policy_sql(policy: &BucketPolicy) -> String {
    let name = policy.name;
    let owner_check = format!(
        "bucket_id = '{name}' AND auth.uid()::text = (storage.foldername(name))[1]"
    );
    let mut sql = format!("-- {name} bucket\n");
    sql.push_str(&replace_policy(
        &format!("{name}: public read"),
        &format!("FOR SELECT TO public\n  USING (bucket_id = '{name}')"),
    ));
    for (verb, clause) in [("INSERT", "WITH CHECK"), ("UPDATE", "USING"), ("DELETE", "USING")] {
        sql.push_str(&replace_policy(
            &format!("{name}: owner {}", verb.to_lowercase()),
            &format!("FOR {verb} TO authenticated\n  {clause} ({owner_check})"),
        ));
    }
    sql
}

/// The full policy script for every app bucket.
pub fn policy_sql() -> String {
    BUCKETS
        .iter()
        .map(bucket_policy_sql)
        .collect::<Vec<_>>()
        .join("\n")
}

fn describe(bucket: &Bucket) -> String {
    let limit = bucket
        .file_size_limit
        .map(|l| format!("{} bytes", l))
        .unwrap_or_else(|| "no limit".to_string());
    let mimes = bucket
        .allowed_mime_types
        .as_ref()
        .map(|m| m.join(", "))
        .unwrap_or_else(|| "any type".to_string());
    format!(
        "{} (public: {}, size limit: {}, types: {})",
        bucket.name, bucket.public, limit, mimes
    )
}

/// Create missing buckets and submit the policies. Each step is logged;
/// failures are collected rather than aborting the run.
pub async fn setup(backend: &Backend) -> BackendResult<Vec<String>> {
    let mut report = Vec::new();
    let existing = backend.objects.list_buckets().await?;

    for policy in BUCKETS {
        if existing.iter().any(|b| b.name == policy.name) {
            tracing::info!("Bucket {} already exists", policy.name);
            report.push(format!("bucket {}: already exists", policy.name));
            continue;
        }
        match backend.objects.create_bucket(&policy.to_bucket()).await {
            Ok(()) => {
                tracing::info!("Created bucket {}", policy.name);
                report.push(format!("bucket {}: created", policy.name));
            }
            Err(e) => {
                tracing::error!("Failed to create bucket {}: {}", policy.name, e);
                report.push(format!("bucket {}: FAILED ({})", policy.name, e));
            }
        }
    }

    match backend
        .store
        .exec_sql(&Credential::Service, &policy_sql())
        .await
    {
        Ok(()) => {
            tracing::info!("Storage policies applied");
            report.push("policies: applied".to_string());
        }
        Err(e) => {
            tracing::warn!("Applying storage policies failed: {}", e);
            report.push(format!(
                "policies: FAILED ({}); apply the output of `greenpoint storage policies` manually",
                e
            ));
        }
    }

    for bucket in backend.objects.list_buckets().await? {
        report.push(format!("final: {}", describe(&bucket)));
    }
    Ok(report)
}

#[derive(Debug, Default)]
pub struct CheckReport {
    pub lines: Vec<String>,
    pub missing: Vec<&'static str>,
}

impl CheckReport {
    pub fn is_healthy(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Report bucket configuration against what the app expects.
pub async fn check(backend: &Backend) -> BackendResult<CheckReport> {
    let mut report = CheckReport::default();
    let buckets = backend.objects.list_buckets().await?;

    for policy in BUCKETS {
        let Some(bucket) = buckets.iter().find(|b| b.name == policy.name) else {
            report.missing.push(policy.name);
            report
                .lines
                .push(format!("MISSING {}: run `greenpoint storage setup`", policy.name));
            continue;
        };
        report.lines.push(format!("found {}", describe(bucket)));
        if !bucket.public {
            report.lines.push(format!(
                "WARNING {} is not public; media URLs will not load",
                policy.name
            ));
        }
        if bucket.file_size_limit != Some(policy.max_bytes) {
            report.lines.push(format!(
                "WARNING {} size limit differs from {} bytes",
                policy.name, policy.max_bytes
            ));
        }
    }

    if !report.missing.contains(&"posts") {
        match backend.objects.list_objects("posts", "").await {
            Ok(objects) => report
                .lines
                .push(format!("posts holds {} objects at the top level", objects.len())),
            Err(e) => report.lines.push(format!("listing posts failed: {}", e)),
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploads::{POSTS, PROFILES};

    #[test]
    fn policy_sql_covers_both_buckets_and_all_verbs() {
        let sql = policy_sql();
        for bucket in ["posts", "profiles"] {
            assert!(sql.contains(&format!("USING (bucket_id = '{bucket}')")));
            for verb in ["INSERT", "UPDATE", "DELETE"] {
                assert!(sql.contains(&format!("\"{bucket}: owner {}\"", verb.to_lowercase())));
            }
        }
        assert!(sql.contains("(storage.foldername(name))[1]"));
    }

    #[test]
    fn every_policy_is_dropped_before_it_is_created() {
        let sql = policy_sql();
        assert!(!sql.contains("IF NOT EXISTS"));

        let creates: Vec<&str> = sql
            .lines()
            .filter_map(|l| l.strip_prefix("CREATE POLICY "))
            .collect();
        assert_eq!(creates.len(), 8);
        for name in creates {
            let drop = format!("DROP POLICY IF EXISTS {name} ON storage.objects;");
            let create = format!("CREATE POLICY {name}\n");
            let drop_at = sql.find(&drop).unwrap_or_else(|| panic!("no drop for {name}"));
            assert!(drop_at < sql.find(&create).unwrap(), "{name}");
        }
    }

    #[tokio::test]
    async fn setup_creates_missing_buckets_and_check_passes() {
        let backend = Backend::memory();
        let before = check(&backend).await.unwrap();
        assert_eq!(before.missing, vec!["posts", "profiles"]);

        let report = setup(&backend).await.unwrap();
        assert!(report.contains(&"bucket posts: created".to_string()));
        assert!(report.contains(&"policies: applied".to_string()));

        let after = check(&backend).await.unwrap();
        assert!(after.is_healthy(), "{:?}", after.lines);

        let buckets = backend.objects.list_buckets().await.unwrap();
        assert!(buckets.contains(&POSTS.to_bucket()));
        assert!(buckets.contains(&PROFILES.to_bucket()));

        let again = setup(&backend).await.unwrap();
        assert!(again.contains(&"bucket profiles: already exists".to_string()));
    }
}
