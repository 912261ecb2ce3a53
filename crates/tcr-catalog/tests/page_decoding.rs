// Wire-format decoding against captured response shapes of the cataloging
// API's paginated endpoints.

use tcr_catalog::{CatalogEntry, ResultsPage};
use tcr_core::Topic;

#[test]
fn structures_page_decodes_topics_with_attributes_and_links() {
    let body = r#"{
        "results": [
            {
                "id": "0f6c2c4e-1111-4a8c-9df5-aaaaaaaaaaaa",
                "name": "Orders",
                "technicalName": "prd_abc_orders_ini",
                "path": "\\Kafka\\ABC\\Orders",
                "attributes": {
                    "Type Topic": "Evenement",
                    "description": "Order lifecycle events",
                    "status": "Validated",
                    "creationTime": "2024-03-01T08:15:00",
                    "lastModificationTime": "2026-01-12T17:40:00",
                    "ignored extra attribute": 42
                },
                "links": {
                    "IsUsedBy": [
                        {"id": "usage-77", "typePath": "\\Usage\\Application"}
                    ]
                }
            },
            {
                "id": "0f6c2c4e-2222-4a8c-9df5-bbbbbbbbbbbb",
                "name": "Bare",
                "technicalName": "prd_zzz_bare_ini",
                "path": "\\Kafka\\ZZZ\\Bare"
            }
        ],
        "next_page": "https://catalog.example.com/v2/structures?page=2"
    }"#;

    let page: ResultsPage<Topic> = serde_json::from_str(body).expect("decode structures page");
    assert_eq!(page.results.len(), 2);
    assert_eq!(
        page.next_page.as_deref(),
        Some("https://catalog.example.com/v2/structures?page=2")
    );

    let orders = &page.results[0];
    assert_eq!(orders.technical_name, "prd_abc_orders_ini");
    assert_eq!(orders.attributes.topic_type.as_deref(), Some("Evenement"));
    assert_eq!(orders.attributes.status.as_deref(), Some("Validated"));
    assert_eq!(orders.usage_parent_id(), Some("usage-77"));

    // attributes and links are optional on the wire
    let bare = &page.results[1];
    assert_eq!(bare.attributes.topic_type, None);
    assert_eq!(bare.usage_parent_id(), None);
}

#[test]
fn fields_page_decodes_local_data_flag_and_terminal_page() {
    let body = r#"{
        "results": [
            {
                "id": "field-1",
                "path": "\\Orders\\Data\\amount",
                "attributes": {"Donnee Locale": true},
                "links": {}
            },
            {
                "id": "field-2",
                "path": "\\Orders\\Data\\currency"
            }
        ]
    }"#;

    let page: ResultsPage<CatalogEntry> = serde_json::from_str(body).expect("decode fields page");
    assert_eq!(page.next_page, None);
    assert!(page.results[0].attributes.local_data);
    assert!(!page.results[1].attributes.local_data);
}

#[test]
fn empty_results_page_decodes() {
    let page: ResultsPage<CatalogEntry> =
        serde_json::from_str(r#"{"results": []}"#).expect("decode empty page");
    assert!(page.results.is_empty());
    assert_eq!(page.next_page, None);
}
