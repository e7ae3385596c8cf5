use std::collections::HashSet;

use st_core::Settings;

/// Domains whose responses get their security headers stripped.
///
/// Union of enabled sites with header stripping on, and every domain pattern
/// of enabled scripts in enabled sources. Deduplicated, first occurrence
/// order kept. `*.base` patterns contribute `base`.
pub fn collect_domains(settings: &Settings) -> Vec<String> {
    if !settings.enabled {
        return Vec::new();
    }

    let site_domains = settings
        .sites
        .iter()
        .filter(|site| site.enabled && site.csp_enabled)
        .map(|site| site.domain.as_str());

    let source_domains = settings
        .sources
        .iter()
        .filter(|source| source.enabled)
        .flat_map(|source| source.scripts.iter())
        .filter(|script| script.enabled)
        .flat_map(|script| script.domains.iter())
        .map(|pattern| pattern.strip_prefix("*.").unwrap_or(pattern.as_str()));

    let mut seen: HashSet<&str> = HashSet::new();
    site_domains
        .chain(source_domains)
        .filter(|domain| !domain.is_empty() && seen.insert(*domain))
        .map(str::to_string)
        .collect()
}

/// Expand each domain to itself and its `www.` subdomain, deduplicated.
pub fn expand_domains(domains: &[String]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(domains.len() * 2);
    for domain in domains {
        for candidate in [domain.clone(), format!("www.{}", domain)] {
            if seen.insert(candidate.clone()) {
                out.push(candidate);
            }
        }
    }
    out
}
