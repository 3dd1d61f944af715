use utoipa::OpenApi;
use utoipa::openapi::security::HttpAuthScheme;
use crate::types::{
    ErrorResponse, GenerateReq, GenerateResp, QuotaStatus, RepromptReq,
    RepromptResp,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::server::rate_limit_handler,
        crate::server::generate_handler,
        crate::server::reprompt_handler,
    ),
    components(
        schemas(
            QuotaStatus,
            GenerateReq,
            GenerateResp,
            RepromptReq,
            RepromptResp,
            ErrorResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "thumbgate", description = "Thumbgate API endpoints")
    ),
    info(
        title = "Thumbgate API",
        version = "1.0",
        description = "AI thumbnail generation with a per-user daily quota",
        contact(
            name = "Connor Dirks & Siraaj Khandkar",
            email = "cdirks4@me.com"
        ),
        license(
            name = "BSD-3-Clause"
        )
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "jwt",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use utoipa::OpenApi;

    use super::ApiDoc;

    #[test]
    fn documents_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        for path in ["/rate-limit", "/generate", "/reprompt"] {
            assert!(paths.iter().any(|p| *p == path), "{path} missing");
        }
        let components = doc.components.unwrap();
        assert!(components.security_schemes.contains_key("jwt"));
    }
}
