use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{ConsumedCapacity, ReturnConsumedCapacity, ReturnValues};
use crate::attr::Item;
use crate::custom_serde::deserialize_null_map;

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutItemInput {
    pub table_name: String,
    pub item: Item,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_expression: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_map")]
    pub expression_attribute_names: HashMap<String, String>,
    #[serde(default, deserialize_with = "deserialize_null_map")]
    pub expression_attribute_values: Item,
    #[serde(default)]
    pub return_values: ReturnValues,
    #[serde(default)]
    pub return_consumed_capacity: ReturnConsumedCapacity,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutItemOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Item>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_capacity: Option<ConsumedCapacity>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetItemInput {
    pub table_name: String,
    pub key: Item,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection_expression: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_map")]
    pub expression_attribute_names: HashMap<String, String>,
    #[serde(default)]
    pub return_consumed_capacity: ReturnConsumedCapacity,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetItemOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Item>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_capacity: Option<ConsumedCapacity>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateItemInput {
    pub table_name: String,
    pub key: Item,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_expression: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_map")]
    pub expression_attribute_names: HashMap<String, String>,
    #[serde(default, deserialize_with = "deserialize_null_map")]
    pub expression_attribute_values: Item,
    #[serde(default)]
    pub return_values: ReturnValues,
    #[serde(default)]
    pub return_consumed_capacity: ReturnConsumedCapacity,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateItemOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Item>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_capacity: Option<ConsumedCapacity>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteItemInput {
    pub table_name: String,
    pub key: Item,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_expression: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_map")]
    pub expression_attribute_names: HashMap<String, String>,
    #[serde(default, deserialize_with = "deserialize_null_map")]
    pub expression_attribute_values: Item,
    #[serde(default)]
    pub return_values: ReturnValues,
    #[serde(default)]
    pub return_consumed_capacity: ReturnConsumedCapacity,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteItemOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Item>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_capacity: Option<ConsumedCapacity>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryInput {
    pub table_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
    pub key_condition_expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection_expression: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_map")]
    pub expression_attribute_names: HashMap<String, String>,
    #[serde(default, deserialize_with = "deserialize_null_map")]
    pub expression_attribute_values: Item,
    /// Ascending sort-key order when absent or true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_index_forward: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusive_start_key: Option<Item>,
    #[serde(default)]
    pub return_consumed_capacity: ReturnConsumedCapacity,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryOutput {
    pub items: Vec<Item>,
    pub count: i64,
    pub scanned_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_evaluated_key: Option<Item>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_capacity: Option<ConsumedCapacity>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScanInput {
    pub table_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection_expression: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_map")]
    pub expression_attribute_names: HashMap<String, String>,
    #[serde(default, deserialize_with = "deserialize_null_map")]
    pub expression_attribute_values: Item,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusive_start_key: Option<Item>,
    #[serde(default)]
    pub return_consumed_capacity: ReturnConsumedCapacity,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScanOutput {
    pub items: Vec<Item>,
    pub count: i64,
    pub scanned_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_evaluated_key: Option<Item>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_capacity: Option<ConsumedCapacity>,
}

/// The keys requested from one table in a BatchGetItem call.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeysAndAttributes {
    pub keys: Vec<Item>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection_expression: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_map")]
    pub expression_attribute_names: HashMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchGetItemInput {
    pub request_items: HashMap<String, KeysAndAttributes>,
    #[serde(default)]
    pub return_consumed_capacity: ReturnConsumedCapacity,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchGetItemOutput {
    pub responses: HashMap<String, Vec<Item>>,
    /// Keys the call could not process, keyed by table, ready to resubmit.
    pub unprocessed_keys: HashMap<String, KeysAndAttributes>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumed_capacity: Vec<ConsumedCapacity>,
}

/// A single put carried inside a BatchWriteItem call.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutRequest {
    pub item: Item,
}

/// A single delete carried inside a BatchWriteItem call.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteRequest {
    pub key: Item,
}

/// One element of a BatchWriteItem request. Exactly one member is set.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct WriteRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub put_request: Option<PutRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_request: Option<DeleteRequest>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchWriteItemInput {
    pub request_items: HashMap<String, Vec<WriteRequest>>,
    #[serde(default)]
    pub return_consumed_capacity: ReturnConsumedCapacity,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchWriteItemOutput {
    /// Writes the call could not process, keyed by table, ready to resubmit.
    pub unprocessed_items: HashMap<String, Vec<WriteRequest>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumed_capacity: Vec<ConsumedCapacity>,
}

/// The read carried by one leg of TransactGetItems.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactGet {
    pub table_name: String,
    pub key: Item,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection_expression: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_map")]
    pub expression_attribute_names: HashMap<String, String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactGetItem {
    pub get: TransactGet,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactGetItemsInput {
    pub transact_items: Vec<TransactGetItem>,
    #[serde(default)]
    pub return_consumed_capacity: ReturnConsumedCapacity,
}

/// One item in a TransactGetItems response. Empty when the row is absent.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Item>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactGetItemsOutput {
    pub responses: Vec<ItemResponse>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumed_capacity: Vec<ConsumedCapacity>,
}

/// A put leg of TransactWriteItems.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactPut {
    pub table_name: String,
    pub item: Item,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_expression: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_map")]
    pub expression_attribute_names: HashMap<String, String>,
    #[serde(default, deserialize_with = "deserialize_null_map")]
    pub expression_attribute_values: Item,
}

/// An update leg of TransactWriteItems.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactUpdate {
    pub table_name: String,
    pub key: Item,
    pub update_expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_expression: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_map")]
    pub expression_attribute_names: HashMap<String, String>,
    #[serde(default, deserialize_with = "deserialize_null_map")]
    pub expression_attribute_values: Item,
}

/// A delete leg of TransactWriteItems.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactDelete {
    pub table_name: String,
    pub key: Item,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_expression: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_map")]
    pub expression_attribute_names: HashMap<String, String>,
    #[serde(default, deserialize_with = "deserialize_null_map")]
    pub expression_attribute_values: Item,
}

/// A pure condition leg of TransactWriteItems: no mutation, only a check.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactConditionCheck {
    pub table_name: String,
    pub key: Item,
    pub condition_expression: String,
    #[serde(default, deserialize_with = "deserialize_null_map")]
    pub expression_attribute_names: HashMap<String, String>,
    #[serde(default, deserialize_with = "deserialize_null_map")]
    pub expression_attribute_values: Item,
}

/// One leg of TransactWriteItems. Exactly one member is set.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactWriteItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub put: Option<TransactPut>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<TransactUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<TransactDelete>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_check: Option<TransactConditionCheck>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactWriteItemsInput {
    pub transact_items: Vec<TransactWriteItem>,
    #[serde(default)]
    pub return_consumed_capacity: ReturnConsumedCapacity,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactWriteItemsOutput {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumed_capacity: Vec<ConsumedCapacity>,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::attr::AttributeValue;

    #[test]
    fn test_put_item_input_parses_service_shape() {
        let data = serde_json::json!({
            "TableName": "Users",
            "Item": { "id": { "S": "u1" }, "age": { "N": "30" } },
            "ConditionExpression": "attribute_not_exists(id)",
            "ReturnValues": "ALL_OLD"
        });
        let input: PutItemInput = serde_json::from_value(data).unwrap();
        assert_eq!("Users", input.table_name);
        assert_eq!(Some(&AttributeValue::N("30".into())), input.item.get("age"));
        assert_eq!(ReturnValues::AllOld, input.return_values);
        assert_eq!(ReturnConsumedCapacity::None, input.return_consumed_capacity);
    }

    #[test]
    fn test_expression_values_tolerate_null() {
        let data = serde_json::json!({
            "TableName": "Users",
            "Key": { "id": { "S": "u1" } },
            "ExpressionAttributeValues": null
        });
        let input: GetItemInput = serde_json::from_value(serde_json::json!({
            "TableName": "Users",
            "Key": { "id": { "S": "u1" } },
            "ExpressionAttributeNames": null
        }))
        .unwrap();
        assert!(input.expression_attribute_names.is_empty());
        let update: UpdateItemInput = serde_json::from_value(data).unwrap();
        assert!(update.expression_attribute_values.is_empty());
    }

    #[test]
    fn test_write_request_shape() {
        let data = serde_json::json!({
            "PutRequest": { "Item": { "id": { "S": "u1" } } }
        });
        let request: WriteRequest = serde_json::from_value(data).unwrap();
        assert!(request.put_request.is_some());
        assert!(request.delete_request.is_none());
    }
}
