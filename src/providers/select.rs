//! Deterministic provider selection and ranking.

use serde::Serialize;

use crate::models::deployment::Budget;
use crate::models::detection::{DetectionResult, ProjectType};
use crate::providers::{netlify, vercel, Capabilities, ProviderKind};

/// Policy inputs that accompany a detection result into selection
#[derive(Debug, Clone)]
pub struct SelectionPolicy {
    pub budget: Budget,
    pub preferred_providers: Vec<ProviderKind>,
    pub explicit_provider: Option<ProviderKind>,
}

/// Pick the provider for a deployment. Total and deterministic.
///
/// Order: explicit override, then the first registered preference,
/// then framework affinity (Next.js on Vercel, static sites on
/// Netlify), and Vercel for everything else.
pub fn choose(detection: &DetectionResult, policy: &SelectionPolicy) -> ProviderKind {
    if let Some(explicit) = policy.explicit_provider {
        if ProviderKind::registered().contains(&explicit) {
            return explicit;
        }
    }

    if let Some(preferred) = policy
        .preferred_providers
        .iter()
        .find(|p| ProviderKind::registered().contains(p))
    {
        return *preferred;
    }

    if detection.framework.to_lowercase().contains("next") {
        return ProviderKind::Vercel;
    }

    if detection.is_pure_static || detection.project_type == ProjectType::Static {
        return ProviderKind::Netlify;
    }

    ProviderKind::Vercel
}

/// One entry in a ranked recommendation list
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub provider: ProviderKind,
    /// Additive score clamped to [0, 100]
    pub score: u32,
    pub reasons: Vec<String>,
}

/// Score every registered provider for UI display.
///
/// Additive scoring: +40 project-type compatibility, +30 free tier when
/// the budget asks for it, ±20 artifact-size fit, plus framework
/// affinity. Ties keep registration order (stable sort).
pub fn recommend(detection: &DetectionResult, budget: Budget, size_mb: f64) -> Vec<Recommendation> {
    let mut ranked: Vec<Recommendation> = ProviderKind::registered()
        .iter()
        .map(|&provider| score_one(provider, detection, budget, size_mb))
        .collect();
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    ranked
}

fn score_one(
    provider: ProviderKind,
    detection: &DetectionResult,
    budget: Budget,
    size_mb: f64,
) -> Recommendation {
    let capabilities = match provider {
        ProviderKind::Netlify => netlify::capabilities(),
        ProviderKind::Vercel => vercel::capabilities(),
    };

    let mut score: i64 = 0;
    let mut reasons = Vec::new();

    if capabilities
        .supported_project_types
        .contains(&detection.project_type)
    {
        score += 40;
        reasons.push(format!(
            "Supports {} projects",
            detection_type_label(detection.project_type)
        ));
    }

    if budget == Budget::Free && capabilities.supports_free_tier {
        score += 30;
        reasons.push("Has a free tier".to_string());
    }

    if size_mb <= capabilities.max_artifact_mb {
        score += 20;
        reasons.push(format!(
            "Artifact fits within the {:.0} MB limit",
            capabilities.max_artifact_mb
        ));
    } else {
        score -= 20;
        reasons.push(format!(
            "Artifact exceeds the {:.0} MB limit",
            capabilities.max_artifact_mb
        ));
    }

    score += framework_affinity(provider, detection, &capabilities, &mut reasons);

    Recommendation {
        provider,
        score: score.clamp(0, 100) as u32,
        reasons,
    }
}

fn framework_affinity(
    provider: ProviderKind,
    detection: &DetectionResult,
    _capabilities: &Capabilities,
    reasons: &mut Vec<String>,
) -> i64 {
    let framework = detection.framework.to_lowercase();
    match provider {
        ProviderKind::Vercel if framework.contains("next") => {
            reasons.push("First-class Next.js hosting".to_string());
            10
        }
        ProviderKind::Netlify
            if detection.is_pure_static || detection.project_type == ProjectType::Static =>
        {
            reasons.push("Ideal for static sites".to_string());
            10
        }
        _ => 0,
    }
}

fn detection_type_label(project_type: ProjectType) -> &'static str {
    match project_type {
        ProjectType::Static => "static",
        ProjectType::Spa => "single-page app",
        ProjectType::Ssr => "server-rendered",
        ProjectType::Unknown => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use crate::models::detection::PackageManager;

    fn detection(project_type: ProjectType, framework: &str, pure_static: bool) -> DetectionResult {
        DetectionResult {
            project_type,
            framework: framework.to_string(),
            has_package_manifest: !pure_static,
            has_build_script: !pure_static,
            build_command: None,
            build_directory: Some("dist".to_string()),
            is_pure_static: pure_static,
            package_manager: PackageManager::Npm,
            estimated_size_mb: 1.0,
            environment_variable_refs: BTreeSet::new(),
        }
    }

    fn policy() -> SelectionPolicy {
        SelectionPolicy {
            budget: Budget::Free,
            preferred_providers: Vec::new(),
            explicit_provider: None,
        }
    }

    #[test]
    fn test_explicit_provider_wins() {
        let mut p = policy();
        p.explicit_provider = Some(ProviderKind::Netlify);
        let d = detection(ProjectType::Ssr, "Next.js", false);
        assert_eq!(choose(&d, &p), ProviderKind::Netlify);
    }

    #[test]
    fn test_preferred_provider_beats_affinity() {
        let mut p = policy();
        p.preferred_providers = vec![ProviderKind::Netlify];
        let d = detection(ProjectType::Ssr, "Next.js", false);
        assert_eq!(choose(&d, &p), ProviderKind::Netlify);
    }

    #[test]
    fn test_nextjs_goes_to_vercel() {
        let d = detection(ProjectType::Ssr, "Next.js", false);
        assert_eq!(choose(&d, &policy()), ProviderKind::Vercel);
    }

    #[test]
    fn test_static_goes_to_netlify() {
        let d = detection(ProjectType::Static, "Static HTML", true);
        assert_eq!(choose(&d, &policy()), ProviderKind::Netlify);
    }

    #[test]
    fn test_default_is_vercel() {
        let d = detection(ProjectType::Spa, "React", false);
        assert_eq!(choose(&d, &policy()), ProviderKind::Vercel);
    }

    #[test]
    fn test_choose_is_deterministic() {
        let d = detection(ProjectType::Spa, "Vue", false);
        let p = policy();
        assert_eq!(choose(&d, &p), choose(&d, &p));
    }

    #[test]
    fn test_recommend_ranks_netlify_for_static() {
        let d = detection(ProjectType::Static, "Static HTML", true);
        let ranked = recommend(&d, Budget::Free, 1.0);
        assert_eq!(ranked[0].provider, ProviderKind::Netlify);
        assert!(ranked[0].score > ranked[1].score);
        assert!(!ranked[0].reasons.is_empty());
    }

    #[test]
    fn test_recommend_scores_clamped() {
        let d = detection(ProjectType::Ssr, "Next.js", false);
        for entry in recommend(&d, Budget::Any, 10_000.0) {
            assert!(entry.score <= 100);
        }
    }

    #[test]
    fn test_oversized_artifact_penalized() {
        let d = detection(ProjectType::Spa, "React", false);
        let small = recommend(&d, Budget::Any, 1.0);
        let large = recommend(&d, Budget::Any, 10_000.0);
        let small_vercel = small.iter().find(|r| r.provider == ProviderKind::Vercel).unwrap();
        let large_vercel = large.iter().find(|r| r.provider == ProviderKind::Vercel).unwrap();
        assert!(small_vercel.score > large_vercel.score);
    }
}
