//! Mailbox search with progressively simpler fallback queries.
//!
//! Graph's `$search` is picky about combining KQL clauses with `$filter`, so a
//! search that finds nothing is retried with less specific queries:
//!
//! 1. every free-text term plus the boolean filters
//! 2. one free-text term at a time (subject, from, to, query)
//! 3. boolean filters only
//! 4. the most recent messages, unfiltered

use super::{GraphClient, QueryParams};
use crate::error::Result;
use crate::models::{SearchOutcome, SearchTerms};
use serde_json::Value;
use tracing::{error, info};

pub const EMAIL_SELECT_FIELDS: &str = "id,subject,from,toRecipients,ccRecipients,receivedDateTime,bodyPreview,hasAttachments,importance,isRead";

fn base_params(count: u32) -> QueryParams {
    vec![
        ("$top", count.to_string()),
        ("$select", EMAIL_SELECT_FIELDS.to_string()),
        ("$orderby", "receivedDateTime desc".to_string()),
    ]
}

fn add_boolean_filters(params: &mut QueryParams, terms: &SearchTerms) {
    let mut conditions = Vec::new();
    if terms.has_attachments {
        conditions.push("hasAttachments eq true");
    }
    if terms.unread_only {
        conditions.push("isRead eq false");
    }
    if !conditions.is_empty() {
        params.push(("$filter", conditions.join(" and ")));
    }
}

/// KQL for all free-text terms: the general query bare, fields as `field:"value"`.
fn combined_kql(terms: &SearchTerms) -> Option<String> {
    let mut clauses = Vec::new();
    if let Some(q) = terms.query() {
        clauses.push(q.to_string());
    }
    if let Some(s) = terms.subject() {
        clauses.push(format!("subject:\"{}\"", s));
    }
    if let Some(f) = terms.sender() {
        clauses.push(format!("from:\"{}\"", f));
    }
    if let Some(t) = terms.recipient() {
        clauses.push(format!("to:\"{}\"", t));
    }
    (!clauses.is_empty()).then(|| clauses.join(" "))
}

pub(crate) fn combined_params(terms: &SearchTerms, count: u32) -> QueryParams {
    let mut params = base_params(count);
    if let Some(kql) = combined_kql(terms) {
        params.push(("$search", kql));
    }
    add_boolean_filters(&mut params, terms);
    params
}

/// Non-empty single terms in the order they are tried.
fn single_terms(terms: &SearchTerms) -> Vec<(&'static str, &str)> {
    [
        ("subject", terms.subject()),
        ("from", terms.sender()),
        ("to", terms.recipient()),
        ("query", terms.query()),
    ]
    .into_iter()
    .filter_map(|(name, value)| value.map(|v| (name, v)))
    .collect()
}

fn single_term_params(name: &str, value: &str, terms: &SearchTerms, count: u32) -> QueryParams {
    let mut params = base_params(count);
    let kql = if name == "query" {
        format!("\"{}\"", value)
    } else {
        format!("{}:\"{}\"", name, value)
    };
    params.push(("$search", kql));
    add_boolean_filters(&mut params, terms);
    params
}

fn messages(resp: &Value) -> Vec<Value> {
    resp.get("value")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Run the search cascade against `endpoint` (e.g. `me/messages`).
///
/// Errors from the targeted strategies are logged and skipped; only the final
/// unfiltered request can fail the search.
pub async fn progressive_search(
    graph: &GraphClient,
    access_token: &str,
    endpoint: &str,
    terms: &SearchTerms,
    count: u32,
) -> Result<SearchOutcome> {
    let mut strategies: Vec<String> = Vec::new();

    strategies.push("combined-search".into());
    let params = combined_params(terms, count);
    match graph.get(access_token, endpoint, &params).await {
        Ok(resp) => {
            let found = messages(&resp);
            if !found.is_empty() {
                info!(results = found.len(), "Combined search successful");
                return Ok(SearchOutcome {
                    messages: found,
                    strategies,
                    fell_back: false,
                });
            }
        }
        Err(e) => error!(error = %e, "Combined search failed"),
    }

    for (name, value) in single_terms(terms) {
        strategies.push(format!("single-term-{}", name));
        info!(term = name, "Attempting single-term search");
        let params = single_term_params(name, value, terms, count);
        match graph.get(access_token, endpoint, &params).await {
            Ok(resp) => {
                let found = messages(&resp);
                if !found.is_empty() {
                    info!(term = name, results = found.len(), "Single-term search successful");
                    return Ok(SearchOutcome {
                        messages: found,
                        strategies,
                        fell_back: false,
                    });
                }
            }
            Err(e) => error!(term = name, error = %e, "Single-term search failed"),
        }
    }

    if terms.has_boolean_filters() {
        strategies.push("boolean-filters-only".into());
        let mut params = base_params(count);
        add_boolean_filters(&mut params, terms);
        match graph.get(access_token, endpoint, &params).await {
            Ok(resp) => {
                let found = messages(&resp);
                info!(results = found.len(), "Boolean filter search finished");
                return Ok(SearchOutcome {
                    messages: found,
                    strategies,
                    fell_back: false,
                });
            }
            Err(e) => error!(error = %e, "Boolean filter search failed"),
        }
    }

    info!("All search strategies failed, falling back to recent emails");
    strategies.push("recent-emails".into());
    let resp = graph
        .get(access_token, endpoint, &base_params(count))
        .await?;
    let found = messages(&resp);
    info!(results = found.len(), "Fallback to recent emails finished");

    Ok(SearchOutcome {
        messages: found,
        strategies,
        fell_back: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use mockito::{Matcher, Server};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn search_param(kql: &str) -> Matcher {
        Matcher::UrlEncoded("$search".into(), kql.into())
    }

    fn param_value<'a>(params: &'a QueryParams, key: &str) -> Option<&'a str> {
        params
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_combined_params_all_terms() {
        let terms = SearchTerms {
            query: Some("budget".into()),
            from: Some("alice@example.com".into()),
            to: Some("bob".into()),
            subject: Some("Q3".into()),
            has_attachments: true,
            unread_only: true,
        };
        let params = combined_params(&terms, 10);

        assert_eq!(param_value(&params, "$top"), Some("10"));
        assert_eq!(
            param_value(&params, "$search"),
            Some("budget subject:\"Q3\" from:\"alice@example.com\" to:\"bob\"")
        );
        assert_eq!(
            param_value(&params, "$filter"),
            Some("hasAttachments eq true and isRead eq false")
        );
    }

    #[test]
    fn test_combined_params_without_terms_has_no_search() {
        let params = combined_params(&SearchTerms::default(), 5);
        assert!(param_value(&params, "$search").is_none());
        assert!(param_value(&params, "$filter").is_none());
        assert_eq!(param_value(&params, "$orderby"), Some("receivedDateTime desc"));
    }

    #[test]
    fn test_single_term_order_skips_empty() {
        let terms = SearchTerms {
            query: Some("hello".into()),
            to: Some("".into()),
            subject: Some("Invoice".into()),
            ..Default::default()
        };
        let names: Vec<_> = single_terms(&terms).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["subject", "query"]);
    }

    #[test]
    fn test_single_term_query_is_quoted_without_prefix() {
        let terms = SearchTerms::default();
        let params = single_term_params("query", "quarterly report", &terms, 10);
        assert_eq!(param_value(&params, "$search"), Some("\"quarterly report\""));

        let params = single_term_params("from", "alice", &terms, 10);
        assert_eq!(param_value(&params, "$search"), Some("from:\"alice\""));
    }

    #[tokio::test]
    async fn test_combined_hit_stops_immediately() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/me/messages")
            .match_query(search_param("subject:\"Invoice\""))
            .with_status(200)
            .with_body(r#"{"value": [{"id": "1"}]}"#)
            .expect(1)
            .create_async()
            .await;

        let graph = GraphClient::new(&server.url()).unwrap();
        let terms = SearchTerms {
            subject: Some("Invoice".into()),
            ..Default::default()
        };
        let outcome = progressive_search(&graph, "t", "me/messages", &terms, 10)
            .await
            .unwrap();

        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(outcome.strategies, vec!["combined-search"]);
        assert!(!outcome.fell_back);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_falls_through_to_single_term() {
        let mut server = Server::new_async().await;
        // Combined query (query + subject) finds nothing
        server
            .mock("GET", "/me/messages")
            .match_query(search_param("acme subject:\"Invoice\""))
            .with_status(200)
            .with_body(r#"{"value": []}"#)
            .create_async()
            .await;
        let single = server
            .mock("GET", "/me/messages")
            .match_query(search_param("subject:\"Invoice\""))
            .with_status(200)
            .with_body(r#"{"value": [{"id": "1"}, {"id": "2"}]}"#)
            .create_async()
            .await;

        let graph = GraphClient::new(&server.url()).unwrap();
        let terms = SearchTerms {
            query: Some("acme".into()),
            subject: Some("Invoice".into()),
            ..Default::default()
        };
        let outcome = progressive_search(&graph, "t", "me/messages", &terms, 10)
            .await
            .unwrap();

        assert_eq!(outcome.messages.len(), 2);
        assert_eq!(
            outcome.strategies,
            vec!["combined-search", "single-term-subject"]
        );
        single.assert_async().await;
    }

    #[tokio::test]
    async fn test_subject_only_terms_record_two_strategies() {
        let mut server = Server::new_async().await;
        // Combined and single-term queries are identical here; answer the
        // first call with nothing and the second with hits
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mock = server
            .mock("GET", "/me/messages")
            .match_query(search_param("subject:\"Invoice\""))
            .with_status(200)
            .with_body_from_request(move |_| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    br#"{"value": []}"#.to_vec()
                } else {
                    br#"{"value": [{"id": "1"}, {"id": "2"}]}"#.to_vec()
                }
            })
            .expect(2)
            .create_async()
            .await;

        let graph = GraphClient::new(&server.url()).unwrap();
        let terms = SearchTerms {
            subject: Some("Invoice".into()),
            ..Default::default()
        };
        let outcome = progressive_search(&graph, "t", "me/messages", &terms, 10)
            .await
            .unwrap();

        assert_eq!(outcome.messages.len(), 2);
        assert_eq!(
            outcome.strategies,
            vec!["combined-search", "single-term-subject"]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_errors_are_swallowed_until_filters_only() {
        let mut server = Server::new_async().await;
        // Anything with $search is rejected
        server
            .mock("GET", "/me/messages")
            .match_query(Matcher::Regex("search".into()))
            .with_status(400)
            .with_body("SearchWithFilterNotSupported")
            .create_async()
            .await;
        let filters_only = server
            .mock("GET", "/me/messages")
            .match_query(Matcher::Regex(
                r"^%24top=10&%24select=[^&]*&%24orderby=[^&]*&\$filter=isRead%20eq%20false$".into(),
            ))
            .with_status(200)
            .with_body(r#"{"value": []}"#)
            .create_async()
            .await;

        let graph = GraphClient::new(&server.url()).unwrap();
        let terms = SearchTerms {
            from: Some("alice".into()),
            unread_only: true,
            ..Default::default()
        };
        let outcome = progressive_search(&graph, "t", "me/messages", &terms, 10)
            .await
            .unwrap();

        // Filters-only result is returned even when empty
        assert!(outcome.messages.is_empty());
        assert_eq!(
            outcome.strategies,
            vec!["combined-search", "single-term-from", "boolean-filters-only"]
        );
        assert!(!outcome.fell_back);
        filters_only.assert_async().await;
    }

    #[tokio::test]
    async fn test_falls_back_to_recent() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/me/messages")
            .match_query(Matcher::Regex("search".into()))
            .with_status(200)
            .with_body(r#"{"value": []}"#)
            .create_async()
            .await;
        let recent = server
            .mock("GET", "/me/messages")
            .match_query(Matcher::Regex(
                "^%24top=3&%24select=[^&]*&%24orderby=[^&]*$".into(),
            ))
            .with_status(200)
            .with_body(r#"{"value": [{"id": "r1"}]}"#)
            .create_async()
            .await;

        let graph = GraphClient::new(&server.url()).unwrap();
        let terms = SearchTerms {
            to: Some("nobody".into()),
            ..Default::default()
        };
        let outcome = progressive_search(&graph, "t", "me/messages", &terms, 3)
            .await
            .unwrap();

        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(
            outcome.strategies,
            vec!["combined-search", "single-term-to", "recent-emails"]
        );
        assert!(outcome.fell_back);
        recent.assert_async().await;
    }

    #[tokio::test]
    async fn test_final_step_error_propagates() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/me/messages")
            .match_query(Matcher::Any)
            .with_status(401)
            .create_async()
            .await;

        let graph = GraphClient::new(&server.url()).unwrap();
        let terms = SearchTerms {
            query: Some("x".into()),
            ..Default::default()
        };
        let err = progressive_search(&graph, "t", "me/messages", &terms, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized));
    }
}
