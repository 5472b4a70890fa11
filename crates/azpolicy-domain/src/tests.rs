#[cfg(test)]
mod tests {
    use crate::types::*;
    use crate::DomainError;

    #[test]
    fn context_for_run_suffixes_names() {
        let ctx = AzureContext::for_run("sub-1", "daily_policies_tests", "ab12cd34").unwrap();
        assert_eq!(ctx.resource_group_name, "daily_policies_tests-ab12cd34");
        assert_eq!(ctx.security_group_name, "daily_policies_tests-ab12cd34");
        assert_eq!(ctx.subscription_id, "sub-1");
    }

    #[test]
    fn context_for_run_without_run_id_keeps_base() {
        let ctx = AzureContext::for_run("sub-1", "daily_policies_tests", "").unwrap();
        assert_eq!(ctx.resource_group_name, "daily_policies_tests");
    }

    #[test]
    fn long_base_name_keeps_run_id() {
        let base = "a".repeat(90);
        let one = AzureContext::for_run("sub", &base, "ab12cd34").unwrap();
        let two = AzureContext::for_run("sub", &base, "ff00ee11").unwrap();

        assert_ne!(one.security_group_name, two.security_group_name);
        assert_ne!(one.resource_group_name, two.resource_group_name);
        assert_eq!(one.resource_group_name.len(), RESOURCE_GROUP_NAME_MAX);
        assert_eq!(one.security_group_name.len(), SECURITY_GROUP_NAME_MAX);
        assert!(one.security_group_name.ends_with("-ab12cd34"));
        assert!(two.resource_group_name.ends_with("-ff00ee11"));
    }

    #[test]
    fn run_id_is_sanitized_too() {
        let ctx = AzureContext::for_run("sub", "checks", "run 7").unwrap();
        assert_eq!(ctx.resource_group_name, "checks-run-7");
    }

    #[test]
    fn context_rejects_empty_subscription() {
        let err = AzureContext::new("  ", "rg", "nsg").unwrap_err();
        assert!(matches!(err, DomainError::InvalidConfig(_)));
    }

    #[test]
    fn context_rejects_empty_names() {
        assert!(AzureContext::new("sub", "", "nsg").is_err());
        assert!(AzureContext::new("sub", "rg", "").is_err());
    }

    #[test]
    fn sanitize_replaces_invalid_chars() {
        assert_eq!(sanitize_resource_name("my rg/tests", 90), "my-rg-tests");
        assert_eq!(sanitize_resource_name("rg(1).", 90), "rg(1)");
    }

    #[test]
    fn sanitize_truncates() {
        let long = "a".repeat(120);
        assert_eq!(sanitize_resource_name(&long, RESOURCE_GROUP_NAME_MAX).len(), 90);
        assert_eq!(sanitize_resource_name(&long, SECURITY_GROUP_NAME_MAX).len(), 80);
    }

    #[test]
    fn region_normalization() {
        assert_eq!(normalize_region("West US 2"), "westus2");
        assert_eq!(normalize_region("Brazil Southeast"), "brazilsoutheast");
        assert_eq!(normalize_region("switzerlandnorth"), "switzerlandnorth");
    }

    #[test]
    fn inbound_allow_defaults() {
        let rule = SecurityRuleSpec::inbound_allow("internet", "22");
        assert_eq!(rule.name, "allow_ssh");
        assert_eq!(rule.protocol, Protocol::Tcp);
        assert_eq!(rule.source_port_range, "1-65535");
        assert_eq!(rule.destination_address_prefix, "0.0.0.0/0");
        assert_eq!(rule.destination_port_range, "22");
        assert_eq!(rule.access, Access::Allow);
        assert_eq!(rule.direction, Direction::Inbound);
        assert_eq!(rule.priority, 100);
    }

    #[test]
    fn protocol_wire_names() {
        assert_eq!(Protocol::Any.to_string(), "*");
        assert_eq!(Protocol::Tcp.to_string(), "Tcp");
        assert_eq!(Access::Allow.to_string(), "Allow");
        assert_eq!(Direction::Inbound.to_string(), "Inbound");
    }

    #[test]
    fn security_group_ignores_unknown_fields() {
        let body = serde_json::json!({
            "id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/networkSecurityGroups/nsg",
            "name": "nsg",
            "location": "switzerlandwest",
            "etag": "W/\"x\"",
            "properties": {
                "provisioningState": "Succeeded",
                "resourceGuid": "abc",
                "securityRules": [{
                    "name": "allow_ssh",
                    "properties": { "sourceAddressPrefix": "192.168.0.0/24", "priority": 100 }
                }]
            }
        });
        let nsg: SecurityGroup = serde_json::from_value(body).unwrap();
        assert_eq!(nsg.properties.provisioning_state.as_deref(), Some("Succeeded"));
        assert_eq!(nsg.properties.security_rules.len(), 1);
        assert_eq!(
            nsg.properties.security_rules[0].properties.source_address_prefix.as_deref(),
            Some("192.168.0.0/24")
        );
    }
}
