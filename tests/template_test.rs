mod fixtures;

use multinic::config::{AttachmentTemplate, PluginTemplate};
use multinic::error::TemplateError;

#[test]
fn test_simple_template_parsing() -> Result<(), Box<dyn std::error::Error>> {
    let data = fixtures::simple_template("multi-nic-a", &[fixtures::SPACE_1, fixtures::SPACE_2], false);
    let template = AttachmentTemplate::parse(data.as_bytes())?;

    assert_eq!(template.name, "multi-nic-a");
    assert_eq!(template.cni_version, "0.3.0");
    assert_eq!(template.master_nets, vec![fixtures::SPACE_1, fixtures::SPACE_2]);
    assert!(!template.multi_nic_ipam);
    assert_eq!(template.ipam_type(), Some("host-local"));
    assert_eq!(template.daemon_port, 11000);

    match &template.plugin {
        PluginTemplate::Simple(descriptor) => {
            assert_eq!(descriptor.plugin_type, "ipvlan");
            assert_eq!(descriptor.extra.get("mode"), Some(&serde_json::json!("l2")));
            assert!(descriptor.master.is_none());
        }
        PluginTemplate::Chain(_) => panic!("expected a simple plugin"),
    }
    assert_eq!(template.plugin.describe(), "simple (ipvlan)");

    Ok(())
}

#[test]
fn test_chain_template_parsing() -> Result<(), Box<dyn std::error::Error>> {
    let data = fixtures::chain_template("multi-nic-c", &[fixtures::SPACE_1]);
    let template = AttachmentTemplate::parse(data.as_bytes())?;

    assert!(template.plugin.is_chain());
    assert_eq!(template.plugin.main().plugin_type, "ipvlan");
    assert_eq!(template.plugin.describe(), "chain [ipvlan, tuning]");

    let PluginTemplate::Chain(chain) = &template.plugin else {
        panic!("expected a chain");
    };
    assert_eq!(chain.len(), 2);
    assert_eq!(chain.rest()[0].get(), fixtures::TUNING_ELEMENT);

    Ok(())
}

#[test]
fn test_selection_args() -> Result<(), Box<dyn std::error::Error>> {
    let data = r#"{
        "cniVersion": "0.3.0",
        "name": "multi-nic-args",
        "plugin": {"type": "macvlan"},
        "masterNets": ["10.0.1.0/24"],
        "args": {"cni": {"nics": 2, "masters": ["eth1"], "class": "mellanox"}}
    }"#;
    let template = AttachmentTemplate::parse(data.as_bytes())?;

    assert_eq!(template.args.num_of_interfaces, 2);
    assert_eq!(template.args.interface_names, vec!["eth1"]);
    assert_eq!(template.args.dev_class.as_deref(), Some("mellanox"));
    assert!(template.args.target.is_none());

    Ok(())
}

#[test]
fn test_template_without_plugin_type_or_chain() {
    let data = r#"{"name": "broken", "plugin": {"mode": "l2"}}"#;
    let err = AttachmentTemplate::parse(data.as_bytes()).unwrap_err();
    assert!(matches!(err, TemplateError::MissingPlugin));

    let data = r#"{"name": "broken"}"#;
    let err = AttachmentTemplate::parse(data.as_bytes()).unwrap_err();
    assert!(matches!(err, TemplateError::MissingPlugin));
}

#[test]
fn test_empty_chain_is_rejected() {
    let data = r#"{"name": "empty", "plugin": {"cniVersion": "0.3.0", "plugins": []}}"#;
    let err = AttachmentTemplate::parse(data.as_bytes()).unwrap_err();
    assert!(matches!(err, TemplateError::EmptyChain));
}

#[test]
fn test_malformed_template() {
    let err = AttachmentTemplate::parse(b"{not json").unwrap_err();
    assert!(matches!(err, TemplateError::Malformed(_)));
    assert!(err.to_string().starts_with("failed to parse attachment template"));
}
