use deployd::deploy::planner::{plan, ReferenceKind};
use deployd::deploy::step::{DeploymentStep, RollbackAction, StepKind};
use deployd::models::template::Customizations;

use crate::common::{hr_template, three_step_template};

#[test]
fn test_hr_template_plan_order() {
    let template = hr_template();
    let steps = plan(
        template.template_type,
        &template.structure,
        &Customizations::default(),
    )
    .unwrap();

    let descriptions: Vec<String> = steps.iter().map(|s| s.description()).collect();
    assert_eq!(
        descriptions,
        vec![
            "Install module 'hr'",
            "Install module 'hr_holidays'",
            "Create custom field 'x_badge' on hr.employee",
            "Create workflow 'Onboarding' on hr.employee",
            "Seed 1 record(s) into hr.department",
            "Create dashboard 'HR Overview'",
        ]
    );
}

#[test]
fn test_plan_is_deterministic() {
    let template = hr_template();
    let first = plan(
        template.template_type,
        &template.structure,
        &Customizations::default(),
    )
    .unwrap();
    let second = plan(
        template.template_type,
        &template.structure,
        &Customizations::default(),
    )
    .unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_every_step_but_seed_data_has_an_inverse() {
    let template = hr_template();
    let steps = plan(
        template.template_type,
        &template.structure,
        &Customizations::default(),
    )
    .unwrap();

    for step in &steps {
        let reversible = !step.rollback().is_none();
        assert_eq!(reversible, step.kind() != StepKind::SeedData, "{:?}", step);
    }
    assert_eq!(
        steps[0].rollback(),
        RollbackAction::UninstallModule {
            module: "hr".to_string()
        }
    );
}

#[test]
fn test_dashboard_field_must_be_declared() {
    let mut template = three_step_template();
    template.structure.dashboards[0]
        .fields
        .push("x_margin".to_string());

    let err = plan(
        template.template_type,
        &template.structure,
        &Customizations::default(),
    )
    .unwrap_err();

    assert_eq!(err.unresolved.len(), 1);
    assert_eq!(err.unresolved[0].kind, ReferenceKind::Field);
    assert_eq!(err.unresolved[0].name, "sale.order.x_margin");
    assert_eq!(err.unresolved[0].source, "dashboard 'Sales'");
}

#[test]
fn test_skipping_a_module_a_field_needs_fails_planning() {
    let template = three_step_template();
    let customizations = Customizations {
        skip_modules: vec!["sale".to_string()],
        ..Default::default()
    };

    let err = plan(template.template_type, &template.structure, &customizations).unwrap_err();
    // Field and dashboard both point at the skipped module
    assert_eq!(err.unresolved.len(), 2);
    assert!(err
        .unresolved
        .iter()
        .all(|r| r.kind == ReferenceKind::Module && r.name == "sale"));
}

#[test]
fn test_customizations_shape_the_plan() {
    let template = three_step_template();
    let mut customizations = Customizations {
        extra_modules: vec!["sale_management".to_string()],
        ..Default::default()
    };
    customizations
        .field_labels
        .insert("x_region".to_string(), "Sales region".to_string());

    let steps = plan(template.template_type, &template.structure, &customizations).unwrap();
    assert_eq!(steps.len(), 4);
    assert_eq!(
        steps[1],
        DeploymentStep::InstallModule {
            module: "sale_management".to_string()
        }
    );
    match &steps[2] {
        DeploymentStep::CreateCustomField(field) => assert_eq!(field.label, "Sales region"),
        other => panic!("unexpected step {:?}", other),
    }
}
