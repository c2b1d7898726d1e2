use super::error::ProxyError;
use super::kind::ProxyDescriptor;
use super::prepare::{Caller, prepare_request, strip_hop_by_hop};
use axum::body::Body;
use axum::http::{Request, Response, Uri, header};
use url::Url;

/// Forward `request` to the datasource described by `descriptor` and stream the answer back.
///
/// # Errors
///
/// [`ProxyError::Forbidden`] when the allow-list rejects the call, [`ProxyError::TlsConfig`]
/// when the transport cannot be built, [`ProxyError::Upstream`] when the datasource cannot be
/// reached, and preparation errors from [`prepare_request`].
pub async fn serve(
    descriptor: ProxyDescriptor,
    request: Request<Body>,
    caller: &Caller,
) -> Result<Response<Body>, ProxyError> {
    let method = request.method().as_str().to_string();
    if !descriptor.config.is_allowed(&method, &descriptor.path) {
        return Err(ProxyError::Forbidden {
            path: descriptor.path.clone(),
            method,
        });
    }

    let (parts, body) = request.into_parts();
    let has_body = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .is_some_and(|v| v.as_bytes() != b"0")
        || parts.headers.contains_key(header::TRANSFER_ENCODING);
    let mut headers = parts.headers;
    prepare_request(&descriptor, &mut headers, caller)?;

    let client = descriptor
        .kind
        .build_transport(descriptor.secret.as_ref())
        .map_err(|e| {
            tracing::error!(error = %format!("{e:#}"), datasource = %descriptor.datasource, "unable to build the tls config");
            ProxyError::TlsConfig
        })?;

    let target = upstream_url(&descriptor.config.url, &descriptor.path, parts.uri.query());
    tracing::debug!(target_url = %descriptor.config.url, "request will be redirected to the datasource");

    let mut upstream = Request::new(if has_body { body } else { Body::empty() });
    *upstream.method_mut() = parts.method;
    *upstream.uri_mut() = target.as_str().parse::<Uri>().map_err(|e| {
        tracing::error!(error = %e, target_url = %descriptor.config.url, "upstream URL is not a valid URI");
        ProxyError::Internal
    })?;
    *upstream.headers_mut() = headers;

    let resp = client.send(upstream).await.map_err(|e| {
        tracing::error!(
            error = %format!("{e:#}"),
            target_url = %descriptor.config.url,
            datasource = %descriptor.datasource,
            "error proxying, remote unreachable"
        );
        ProxyError::Upstream
    })?;

    let (head, body) = resp.into_parts();
    let mut out = Response::builder().status(head.status);
    if let Some(h) = out.headers_mut() {
        *h = head.headers;
        strip_hop_by_hop(h);
    }
    out.body(Body::new(body)).map_err(|e| {
        tracing::error!(error = %e, "unable to build the proxied response");
        ProxyError::Internal
    })
}

/// Join the datasource URL with the decoded forwarded path and merge both query strings.
///
/// The forwarded path is re-encoded on the way out, so a literal `%` stays literal.
pub fn upstream_url(base: &Url, path: &str, query: Option<&str>) -> Url {
    let mut url = base.clone();
    let path = path.replace('%', "%25");
    let path = path.as_str();
    let joined = match (base.path().ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base.path(), &path[1..]),
        (false, false) => format!("{}/{}", base.path(), path),
        _ => format!("{}{}", base.path(), path),
    };
    url.set_path(&joined);

    let merged = match (base.query().filter(|q| !q.is_empty()), query.filter(|q| !q.is_empty())) {
        (Some(a), Some(b)) => Some(format!("{a}&{b}")),
        (Some(a), None) => Some(a.to_string()),
        (None, Some(b)) => Some(b.to_string()),
        (None, None) => None,
    };
    url.set_query(merged.as_deref());
    url
}

#[cfg(test)]
mod tests {
    use super::upstream_url;
    use url::Url;

    fn join(base: &str, path: &str, query: Option<&str>) -> String {
        upstream_url(&Url::parse(base).expect("url"), path, query).to_string()
    }

    #[test]
    fn paths_join_with_single_slash() {
        assert_eq!(
            join("http://prom:9090", "/api/v1/query", None),
            "http://prom:9090/api/v1/query"
        );
        assert_eq!(
            join("http://prom:9090/prefix/", "/api/v1/query", None),
            "http://prom:9090/prefix/api/v1/query"
        );
        assert_eq!(
            join("http://prom:9090/prefix", "/api", None),
            "http://prom:9090/prefix/api"
        );
        assert_eq!(join("http://prom:9090/prefix", "/", None), "http://prom:9090/prefix/");
    }

    #[test]
    fn decoded_paths_are_re_encoded() {
        assert_eq!(
            join("http://prom:9090", "/api/v1/label/job name/values", None),
            "http://prom:9090/api/v1/label/job%20name/values"
        );
        assert_eq!(join("http://prom:9090", "/100%", None), "http://prom:9090/100%25");
    }

    #[test]
    fn queries_are_merged_target_first() {
        assert_eq!(
            join("http://prom/?org=1", "/q", Some("query=up")),
            "http://prom/q?org=1&query=up"
        );
        assert_eq!(join("http://prom", "/q", Some("a=b")), "http://prom/q?a=b");
        assert_eq!(join("http://prom/?org=1", "/q", None), "http://prom/q?org=1");
    }
}
