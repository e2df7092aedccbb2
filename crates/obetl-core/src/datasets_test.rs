use std::path::Path;

use super::*;

fn spec(dataset: Dataset, member: &str) -> DatasetSpec {
    DatasetSpec {
        dataset,
        member: member.to_string(),
        encoding: SourceEncoding::ZippedDelimited,
        delimiter: '~',
        required_columns: vec!["Appl_No".to_string(), "Product_No".to_string()],
        min_expected_rows: 10,
        max_rejection_ratio: 0.02,
        max_deletion_ratio: 0.10,
    }
}

fn full_catalog() -> Catalog {
    Catalog {
        datasets: vec![
            spec(Dataset::Products, "products.txt"),
            spec(Dataset::Patents, "patent.txt"),
            spec(Dataset::Exclusivity, "exclusivity.txt"),
        ],
    }
}

#[test]
fn dataset_display_round_trips_through_from_str() {
    for dataset in Dataset::all() {
        let parsed: Dataset = dataset.as_str().parse().unwrap();
        assert_eq!(parsed, dataset);
    }
}

#[test]
fn dataset_from_str_accepts_singular_patent() {
    let parsed: Dataset = "patent".parse().unwrap();
    assert_eq!(parsed, Dataset::Patents);
}

#[test]
fn dataset_from_str_rejects_unknown_name() {
    let result = "orange".parse::<Dataset>();
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn dependents_excludes_products() {
    assert!(!Dataset::dependents().contains(&Dataset::Products));
}

#[test]
fn validate_accepts_full_catalog() {
    assert!(validate_catalog(&full_catalog()).is_ok());
}

#[test]
fn validate_rejects_duplicate_dataset() {
    let mut catalog = full_catalog();
    catalog.datasets.push(spec(Dataset::Products, "products.txt"));
    let result = validate_catalog(&catalog);
    assert!(
        matches!(result, Err(ConfigError::Validation(ref msg)) if msg.contains("duplicate")),
        "expected duplicate-entry error, got: {result:?}"
    );
}

#[test]
fn validate_rejects_missing_dataset() {
    let mut catalog = full_catalog();
    catalog.datasets.retain(|s| s.dataset != Dataset::Exclusivity);
    let result = validate_catalog(&catalog);
    assert!(
        matches!(result, Err(ConfigError::Validation(ref msg)) if msg.contains("exclusivity")),
        "expected missing-entry error, got: {result:?}"
    );
}

#[test]
fn validate_rejects_out_of_range_rejection_ratio() {
    let mut catalog = full_catalog();
    catalog.datasets[0].max_rejection_ratio = 1.5;
    assert!(validate_catalog(&catalog).is_err());
}

#[test]
fn validate_rejects_empty_member_name() {
    let mut catalog = full_catalog();
    catalog.datasets[1].member = "  ".to_string();
    assert!(validate_catalog(&catalog).is_err());
}

#[test]
fn repository_catalog_file_loads_and_validates() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("config")
        .join("datasets.yaml");
    let catalog = load_catalog(&path).expect("repository catalog should be valid");

    assert_eq!(catalog.datasets.len(), 3);
    let products = catalog.spec(Dataset::Products).unwrap();
    assert_eq!(products.member, "products.txt");
    assert_eq!(products.delimiter, '~');
    assert!(products.required_columns.iter().any(|c| c == "Appl_No"));
}
