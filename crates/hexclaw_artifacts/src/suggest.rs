//! Rule-based next-step suggestions. Zero model calls.
//!
//! Fixed predicates over a job's aggregate, evaluated in priority order,
//! deduplicated by action. The dispatcher's `suggest_next` internal action
//! feeds these straight into an approval gate.

use crate::aggregate::JobAggregate;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    pub action: String,
    pub reason: String,
    pub priority: u8,
}

const WEB_PORTS: [i64; 6] = [80, 443, 8080, 8443, 8000, 3000];
const SMB_PORTS: [i64; 2] = [445, 139];
const DB_PORTS: [(i64, &str); 5] = [
    (3306, "mysql"),
    (5432, "postgres"),
    (27017, "mongodb"),
    (6379, "redis"),
    (9200, "elasticsearch"),
];

/// Derive suggested next scanning steps purely from data.
pub fn suggest_next(agg: &JobAggregate) -> Vec<Suggestion> {
    let mut suggestions: Vec<Suggestion> = Vec::new();
    let crit_high = agg.crit_high_count();

    // P1 - critical or high severity findings
    if crit_high > 0 {
        suggestions.push(Suggestion {
            action: "nuclei --severity critical,high".to_string(),
            reason: format!("{} critical/high finding(s) - confirm and deepen", crit_high),
            priority: 1,
        });
        suggestions.push(Suggestion {
            action: "manual_review".to_string(),
            reason: "Critical findings require human verification".to_string(),
            priority: 1,
        });
    }

    // P2/P3 - web ports detected
    let found_web: Vec<i64> = WEB_PORTS
        .iter()
        .copied()
        .filter(|p| agg.has_port(*p))
        .collect();
    if !found_web.is_empty() {
        let port_list = found_web
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        suggestions.push(Suggestion {
            action: "gobuster dir".to_string(),
            reason: format!("HTTP port(s) open: {}", port_list),
            priority: 2,
        });
        suggestions.push(Suggestion {
            action: "ffuf -u http://TARGET/FUZZ".to_string(),
            reason: "Directory fuzzing complements gobuster".to_string(),
            priority: 3,
        });
        suggestions.push(Suggestion {
            action: "nikto -h TARGET".to_string(),
            reason: "Web server fingerprint and misconfiguration scan".to_string(),
            priority: 3,
        });
    }

    // P2 - SSH
    if agg.has_port(22) {
        suggestions.push(Suggestion {
            action: "ssh_audit TARGET".to_string(),
            reason: "SSH port open - check algorithms, banners, CVEs".to_string(),
            priority: 2,
        });
    }

    // P2 - SMB/NetBIOS
    if SMB_PORTS.iter().any(|p| agg.has_port(*p)) {
        suggestions.push(Suggestion {
            action: "netexec smb TARGET --shares".to_string(),
            reason: "SMB/NetBIOS open - enumerate shares".to_string(),
            priority: 2,
        });
    }

    // P2 - database ports exposed
    for (port, db) in DB_PORTS {
        if agg.has_port(port) {
            suggestions.push(Suggestion {
                action: format!("nmap -sV -p {} --script={} TARGET", port, db),
                reason: format!("{} port {} exposed - check auth and version", db, port),
                priority: 2,
            });
        }
    }

    // P3 - subdomains discovered, sweep the live ones
    if agg.subdomains_found > 0 {
        suggestions.push(Suggestion {
            action: "httpx -status-code -title -tech-detect".to_string(),
            reason: format!(
                "{} subdomain(s) found - fingerprint live ones",
                agg.subdomains_found
            ),
            priority: 3,
        });
    }

    // P4 - findings but nothing critical/high: hand ranking to the model
    if agg.total_vulns > 0 && crit_high == 0 {
        suggestions.push(Suggestion {
            action: "vuln_prioritise".to_string(),
            reason: format!(
                "{} finding(s), none critical/high - run model priority ranking",
                agg.total_vulns
            ),
            priority: 4,
        });
    }

    // P5 - nothing found at all: expand scope
    if suggestions.is_empty() {
        suggestions.push(Suggestion {
            action: "amass enum -passive -d TARGET".to_string(),
            reason: "No findings yet - expand passive recon".to_string(),
            priority: 5,
        });
        suggestions.push(Suggestion {
            action: "masscan -p1-65535 TARGET".to_string(),
            reason: "Full port sweep - fast scan may have missed ports".to_string(),
            priority: 5,
        });
    }

    // Stable sort by priority, then dedup by action
    suggestions.sort_by_key(|s| s.priority);
    let mut seen = std::collections::HashSet::new();
    suggestions.retain(|s| seen.insert(s.action.clone()));
    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;
    use hexclaw_protocol::Severity;
    use std::collections::BTreeMap;

    fn aggregate(
        crit: u64,
        high: u64,
        medium: u64,
        ports: &[i64],
        subs: u64,
    ) -> JobAggregate {
        let mut severity_counts = BTreeMap::new();
        if crit > 0 {
            severity_counts.insert(Severity::Critical, crit);
        }
        if high > 0 {
            severity_counts.insert(Severity::High, high);
        }
        if medium > 0 {
            severity_counts.insert(Severity::Medium, medium);
        }
        JobAggregate {
            job_id: "t".to_string(),
            subdomains_found: subs,
            open_ports: ports.to_vec(),
            open_ports_found: ports.len() as u64,
            total_vulns: crit + high + medium,
            severity_counts,
            ..JobAggregate::default()
        }
    }

    #[test]
    fn test_crit_high_triggers_deep_scan_first() {
        let steps = suggest_next(&aggregate(1, 0, 0, &[], 0));
        assert_eq!(steps[0].action, "nuclei --severity critical,high");
        assert_eq!(steps[0].priority, 1);
        assert!(steps.iter().any(|s| s.action == "manual_review"));
    }

    #[test]
    fn test_web_ports_trigger_content_discovery() {
        let steps = suggest_next(&aggregate(0, 0, 0, &[80, 443], 0));
        assert!(steps.iter().any(|s| s.action == "gobuster dir"));
        assert!(steps.iter().any(|s| s.action.starts_with("ffuf")));
        assert!(steps.iter().any(|s| s.action.starts_with("nikto")));
    }

    #[test]
    fn test_service_ports() {
        let steps = suggest_next(&aggregate(0, 0, 0, &[22, 445, 3306], 0));
        assert!(steps.iter().any(|s| s.action.starts_with("ssh_audit")));
        assert!(steps.iter().any(|s| s.action.starts_with("netexec smb")));
        assert!(steps
            .iter()
            .any(|s| s.action.contains("--script=mysql")));
    }

    #[test]
    fn test_subdomains_trigger_live_host_sweep() {
        let steps = suggest_next(&aggregate(0, 0, 0, &[], 12));
        assert!(steps.iter().any(|s| s.action.starts_with("httpx")));
    }

    #[test]
    fn test_medium_only_requests_model_ranking() {
        let steps = suggest_next(&aggregate(0, 0, 3, &[], 0));
        assert!(steps.iter().any(|s| s.action == "vuln_prioritise"));
        assert!(!steps.iter().any(|s| s.priority == 1));
    }

    #[test]
    fn test_empty_aggregate_widens_scope() {
        let steps = suggest_next(&aggregate(0, 0, 0, &[], 0));
        assert_eq!(steps.len(), 2);
        assert!(steps.iter().all(|s| s.priority == 5));
    }

    #[test]
    fn test_priority_order_and_dedup() {
        let steps = suggest_next(&aggregate(1, 1, 2, &[22, 80, 443], 4));
        let priorities: Vec<u8> = steps.iter().map(|s| s.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort();
        assert_eq!(priorities, sorted);

        let mut actions: Vec<&str> = steps.iter().map(|s| s.action.as_str()).collect();
        actions.sort();
        actions.dedup();
        assert_eq!(actions.len(), steps.len());

        // Crit/high present: no model-ranking request
        assert!(!steps.iter().any(|s| s.action == "vuln_prioritise"));
    }
}
