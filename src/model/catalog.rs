//! Fixed business catalogs: the STRIDE use-case table, component
//! categories, the supported-standard output names and the hardcoded
//! exception lists honored by the balancer and the integrity checker.

use crate::model::UseCase;
use indexmap::IndexMap;
use once_cell::sync::Lazy;

pub const PREFIX_COMPONENT_DEFINITION: &str = "CD-V2-";
pub const PREFIX_RISK_PATTERN: &str = "RP-V2-";
pub const PREFIX_THREAT: &str = "T-";
pub const PREFIX_COUNTERMEASURE: &str = "C-";

/// Weakness ref allowed to carry no countermeasures.
pub const SENTINEL_WEAKNESS: &str = "CWE-7-KINGDOMS";

/// (risk pattern, threat) pairs intentionally left unmitigated. Both the
/// balancer and the mitigation-sum check skip these.
pub const UNMITIGATED_EXCEPTIONS: [(&str, &str); 2] = [
    ("GENERIC-SERVICE:AUTHN-SF", "CAPEC-16"),
    ("GENERIC-SERVICE:DATA-SENS:AUTHZ", "CAPEC-232"),
];

/// Libraries that use orphaned controls as a modeling convention.
pub const ORPHANED_CONTROL_ALLOWED: [&str; 2] = ["IR-Functional-Components", "mitre-attack-framework"];

pub fn is_unmitigated_exception(risk_pattern: &str, threat: &str) -> bool {
    UNMITIGATED_EXCEPTIONS
        .iter()
        .any(|(rp, t)| *rp == risk_pattern && *t == threat)
}

pub fn general_use_case() -> UseCase {
    UseCase {
        ref_: "General".to_string(),
        name: "General".to_string(),
        desc: String::new(),
    }
}

/// STRIDE-LM grouping buckets keyed by the category's first letter.
pub static STRIDE_USE_CASES: Lazy<IndexMap<char, UseCase>> = Lazy::new(|| {
    let mut m = IndexMap::new();
    m.insert(
        'S',
        UseCase {
            ref_: "UC-STRIDE-SPOOFING".to_string(),
            name: "Spoofing".to_string(),
            desc: "Spoofing involves an attacker pretending to be someone else by falsifying \
                   data or identity to gain unauthorized access to systems or information."
                .to_string(),
        },
    );
    m.insert(
        'T',
        UseCase {
            ref_: "UC-STRIDE-TAMPERING".to_string(),
            name: "Tampering".to_string(),
            desc: "Tampering refers to unauthorized modification of data or systems, altering \
                   data in transit or modifying software components to compromise integrity."
                .to_string(),
        },
    );
    m.insert(
        'R',
        UseCase {
            ref_: "UC-STRIDE-REPUDIATION".to_string(),
            name: "Repudiation".to_string(),
            desc: "Repudiation involves denying an action or event that has taken place, such \
                   as denying sending a message or making a transaction."
                .to_string(),
        },
    );
    m.insert(
        'I',
        UseCase {
            ref_: "UC-STRIDE-INFORMATION-DISCLOSURE".to_string(),
            name: "Information Disclosure".to_string(),
            desc: "Information disclosure occurs when sensitive data is exposed to unauthorized \
                   parties, such as personal data, financial records or intellectual property."
                .to_string(),
        },
    );
    m.insert(
        'D',
        UseCase {
            ref_: "UC-STRIDE-DENIAL-OF-SERVICE".to_string(),
            name: "Denial of Service".to_string(),
            desc: "Denial of Service attacks disrupt the availability of services or resources \
                   to legitimate users by overwhelming systems with excessive traffic."
                .to_string(),
        },
    );
    m.insert(
        'E',
        UseCase {
            ref_: "UC-STRIDE-ELEVATION-OF-PRIVILEGE".to_string(),
            name: "Elevation of Privilege".to_string(),
            desc: "Elevation of privilege involves an attacker gaining higher levels of access \
                   or permissions than intended to perform unauthorized actions."
                .to_string(),
        },
    );
    m.insert(
        'L',
        UseCase {
            ref_: "UC-STRIDE-LATERAL-MOVEMENT".to_string(),
            name: "Lateral Movement".to_string(),
            desc: "Lateral Movement refers to attackers moving horizontally across a network \
                   after gaining initial access to compromise additional systems."
                .to_string(),
        },
    );
    m
});

/// Resolve a STRIDE group label ("Spoofing", "S", ...) to its use case,
/// falling back to "General".
pub fn use_case_for_group(group: &str) -> UseCase {
    group
        .chars()
        .next()
        .and_then(|letter| STRIDE_USE_CASES.get(&letter.to_ascii_uppercase()))
        .cloned()
        .unwrap_or_else(general_use_case)
}

/// Component categories available for authoring, keyed by ref.
pub static CATEGORIES: Lazy<IndexMap<&'static str, &'static str>> = Lazy::new(|| {
    IndexMap::from([
        ("amazon-web-services", "Amazon Web Services"),
        ("microsoft-azure", "Microsoft Azure"),
        ("google-cloud-platform", "Google Cloud Platform"),
        ("oracle-cloud-infrastructure", "Oracle Cloud Infrastructure"),
        ("alibaba-cloud", "Alibaba Cloud"),
        ("kubernetes", "Kubernetes"),
        ("docker-category", "Docker"),
        ("functional", "Functional"),
        ("network-components", "Network Components"),
        ("boundary-devices", "Boundary Devices"),
        ("data-store", "Data store"),
        ("message-broker", "Message Broker"),
        ("service-side", "Server-side"),
        ("client-side", "Client-side"),
        ("on-premises-architecture", "On Premises Architecture"),
        ("microservice-architecture", "Microservice architecture"),
        ("virtual-components", "Virtual Components"),
        ("generic-components", "Generic Components"),
        ("hardware", "Hardware"),
        ("iot-components", "IoT components"),
        ("automotive", "Automotive"),
        ("blockchain", "Blockchain"),
        ("machine-learning-artificial-intelligence", "ML/AI"),
        ("financial-services", "Financial Services"),
        ("regulatory", "Regulatory"),
        ("sap-components", "SAP Components"),
        ("salesforce-components", "Salesforce components"),
        ("vmware", "VMware"),
        ("general", "General"),
    ])
});

pub fn category_name(ref_: &str) -> &str {
    CATEGORIES.get(ref_).copied().unwrap_or(ref_)
}

/// How a standard label used during authoring is rendered in the exported
/// XML `supportedStandards` block: label -> (ref, name).
pub static STANDARD_OUTPUT_NAMES: Lazy<IndexMap<&'static str, (&'static str, &'static str)>> =
    Lazy::new(|| {
        IndexMap::from([
            ("ISO 27001", ("iso-27002-2022", "ISO/IEC 27002:2022")),
            ("NIST 800-53 v5", ("NIST 800-53", "NIST 800-53")),
            ("ASVS", ("owasp-asvs4-level-3", "OWASP-ASVS4-Level-3")),
            ("NIST 800-63", ("nist-800-63", "NIST 800-63")),
            ("FedRAMP", ("fedramp-high-baseline", "FedRAMP High Baseline")),
            ("OWASP Top 10 2021", ("owasp-top-10-2021", "OWASP Top 10 2021")),
            ("PCI DSS v3.2.1", ("PCI-DSS-v3.2.1", "PCI-DSS-v3.2.1")),
            ("Cloud Controls Matrix", ("cloud-control-matrix", "Cloud Controls Matrix")),
            ("CWE", ("cwe-standard", "CWE")),
            ("NIST SSDF", ("nist-ssdf", "NIST SSDF")),
            ("OWASP Cheat Sheets", ("owasp-cheat-sheets", "OWASP Cheat Sheets")),
            ("OWASP Proactive Controls", ("owasp-proactive-controls", "OWASP Proactive Controls")),
            ("SAMM", ("SAMM", "SAMM")),
            ("CRE", ("OpenCRE", "OpenCRE")),
            ("NIST CSF v1.1", ("nist-csf", "NIST Cybersecurity Framework")),
            ("D3FEND", ("D3FEND", "Mitre D3FEND Framework")),
            ("CCPA", ("ccpa", "California Consumer Privacy Act")),
        ])
    });

/// (ref, name) pair rendered for a standard label. Unknown labels are
/// passed through verbatim so imports never lose data.
pub fn standard_output_name(label: &str) -> (String, String) {
    match STANDARD_OUTPUT_NAMES.get(label) {
        Some((r, n)) => ((*r).to_string(), (*n).to_string()),
        None => (label.to_string(), label.to_string()),
    }
}

/// Inverse of [`standard_output_name`]: recover the authoring label from
/// an exported supported-standard ref, passing unknown refs through.
pub fn standard_label_for_output_ref(output_ref: &str) -> String {
    STANDARD_OUTPUT_NAMES
        .iter()
        .find(|(_, (r, _))| *r == output_ref)
        .map(|(label, _)| (*label).to_string())
        .unwrap_or_else(|| output_ref.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stride_table_has_seven_buckets() {
        assert_eq!(STRIDE_USE_CASES.len(), 7);
        for letter in ['S', 'T', 'R', 'I', 'D', 'E', 'L'] {
            assert!(STRIDE_USE_CASES.contains_key(&letter), "missing {letter}");
        }
    }

    #[test]
    fn test_use_case_for_group() {
        assert_eq!(use_case_for_group("Spoofing").ref_, "UC-STRIDE-SPOOFING");
        assert_eq!(use_case_for_group("S").ref_, "UC-STRIDE-SPOOFING");
        assert_eq!(use_case_for_group("tampering").ref_, "UC-STRIDE-TAMPERING");
        assert_eq!(use_case_for_group("Lateral Movement").ref_, "UC-STRIDE-LATERAL-MOVEMENT");
        assert_eq!(use_case_for_group("Unknown").ref_, "General");
        assert_eq!(use_case_for_group("").ref_, "General");
    }

    #[test]
    fn test_unmitigated_exceptions() {
        assert!(is_unmitigated_exception("GENERIC-SERVICE:AUTHN-SF", "CAPEC-16"));
        assert!(is_unmitigated_exception(
            "GENERIC-SERVICE:DATA-SENS:AUTHZ",
            "CAPEC-232"
        ));
        assert!(!is_unmitigated_exception("GENERIC-SERVICE:AUTHN-SF", "CAPEC-232"));
        assert!(!is_unmitigated_exception("RP-V2-ANYTHING", "T-ANYTHING"));
    }

    #[test]
    fn test_standard_output_name_known_and_unknown() {
        assert_eq!(
            standard_output_name("ISO 27001"),
            ("iso-27002-2022".to_string(), "ISO/IEC 27002:2022".to_string())
        );
        assert_eq!(
            standard_output_name("In-House Baseline"),
            ("In-House Baseline".to_string(), "In-House Baseline".to_string())
        );
    }

    #[test]
    fn test_standard_label_reverse_lookup() {
        assert_eq!(standard_label_for_output_ref("iso-27002-2022"), "ISO 27001");
        assert_eq!(standard_label_for_output_ref("owasp-asvs4-level-3"), "ASVS");
        assert_eq!(standard_label_for_output_ref("custom-ref"), "custom-ref");
    }

    #[test]
    fn test_category_name() {
        assert_eq!(category_name("data-store"), "Data store");
        assert_eq!(category_name("not-a-category"), "not-a-category");
    }
}
