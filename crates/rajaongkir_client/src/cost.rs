//! Shipping-cost response normalisation.
//!
//! The cost endpoints answer in one of two shapes depending on plan and
//! endpoint: entries grouped per courier (`{code, name, services: [...]}`),
//! or a flat list with one row per service (`{code, name, service, cost, etd}`).
//! Both are folded into `Vec<CostOption>`.

use common::{CostDetail, CostOption, ServiceCost};
use serde_json::Value;

/// First non-empty string (or number rendered as string) among `keys`.
fn text(item: &Value, keys: &[&str]) -> String {
    for key in keys {
        match item.get(*key) {
            Some(Value::String(s)) if !s.is_empty() => return s.clone(),
            Some(Value::Number(n)) => return n.to_string(),
            _ => {}
        }
    }
    String::new()
}

fn amount(item: &Value, keys: &[&str]) -> i64 {
    for key in keys {
        match item.get(*key) {
            Some(Value::Number(n)) => {
                if let Some(v) = n.as_i64() {
                    return v;
                }
                if let Some(v) = n.as_f64() {
                    return v.round() as i64;
                }
            }
            Some(Value::String(s)) => {
                if let Ok(v) = s.trim().parse::<i64>() {
                    return v;
                }
            }
            _ => {}
        }
    }
    0
}

fn services_of(item: &Value) -> Option<&Vec<Value>> {
    ["services", "costs", "cost"]
        .iter()
        .find_map(|key| item.get(*key).and_then(Value::as_array))
}

fn grouped_service(svc: &Value) -> ServiceCost {
    let cost = svc
        .get("cost")
        .and_then(Value::as_array)
        .map(|details| {
            details
                .iter()
                .map(|d| CostDetail {
                    value: amount(d, &["value", "price"]),
                    etd: text(d, &["etd", "etd_info"]),
                    note: text(d, &["note"]),
                })
                .collect()
        })
        .unwrap_or_default();

    ServiceCost {
        service: text(svc, &["service", "name", "service_name"]),
        description: text(svc, &["description", "desc"]),
        cost,
    }
}

fn flat_cost_value(item: &Value) -> i64 {
    match item.get("cost") {
        Some(Value::Object(_)) => item.get("cost").map(|c| amount(c, &["value"])).unwrap_or(0),
        _ => amount(item, &["cost"]),
    }
}

/// Normalise the `data` array of a cost response.
pub fn normalize_costs(items: &[Value]) -> Vec<CostOption> {
    let grouped = items.first().and_then(services_of).is_some();

    if grouped {
        return items
            .iter()
            .map(|c| CostOption {
                code: text(c, &["code", "courier_code", "courier"]),
                name: text(c, &["name", "courier_name"]),
                costs: services_of(c)
                    .map(|svcs| svcs.iter().map(grouped_service).collect())
                    .unwrap_or_default(),
            })
            .collect();
    }

    let mut couriers: Vec<CostOption> = Vec::new();
    for item in items {
        let code = text(item, &["code", "courier", "courier_code"]);
        let service = ServiceCost {
            service: text(item, &["service", "service_name", "name"]),
            description: text(item, &["description", "desc"]),
            cost: vec![CostDetail {
                value: flat_cost_value(item),
                etd: text(item, &["etd", "etd_info"]),
                note: String::new(),
            }],
        };

        match couriers.iter_mut().find(|c| c.code == code) {
            Some(existing) => existing.costs.push(service),
            None => couriers.push(CostOption {
                name: text(item, &["name", "courier_name"]),
                code,
                costs: vec![service],
            }),
        }
    }
    couriers
}
