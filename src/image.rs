use crate::request::DeploymentRequest;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("either --registry or --image-name must be specified")]
    MissingImageSource,

    #[error("--registry and --image-name are mutually exclusive")]
    ConflictingImageSource,

    #[error("--no-docker cannot be combined with --registry, building an image requires docker")]
    NoDockerWithRegistry,
}

/// The image a deployment runs, and whether we have to build it first.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedImage {
    pub reference: String,
    pub requires_build: bool,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Work out which image to deploy. Runs before any side effect.
pub fn resolve(request: &DeploymentRequest) -> Result<ResolvedImage, Error> {
    match (non_empty(&request.registry), non_empty(&request.image_name)) {
        (Some(_), Some(_)) => Err(Error::ConflictingImageSource),
        (Some(_), None) if request.no_docker => Err(Error::NoDockerWithRegistry),
        (Some(registry), None) => Ok(ResolvedImage {
            reference: format!("{}/{}", registry, request.name),
            requires_build: true,
        }),
        (None, Some(image_name)) => Ok(ResolvedImage {
            reference: image_name.to_string(),
            requires_build: false,
        }),
        (None, None) => Err(Error::MissingImageSource),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(registry: Option<&str>, image_name: Option<&str>) -> DeploymentRequest {
        DeploymentRequest {
            name: "n".into(),
            registry: registry.map(String::from),
            image_name: image_name.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn registry_requires_build() {
        assert_eq!(
            resolve(&request(Some("r"), None)),
            Ok(ResolvedImage {
                reference: "r/n".into(),
                requires_build: true
            })
        );
    }

    #[test]
    fn image_name_is_used_as_is() {
        assert_eq!(
            resolve(&request(None, Some("img"))),
            Ok(ResolvedImage {
                reference: "img".into(),
                requires_build: false
            })
        );
    }

    #[test]
    fn missing_image_source() {
        assert_eq!(resolve(&request(None, None)), Err(Error::MissingImageSource));
        assert_eq!(
            resolve(&request(Some(""), Some(""))),
            Err(Error::MissingImageSource)
        );
    }

    #[test]
    fn empty_registry_falls_through_to_image_name() {
        assert_eq!(
            resolve(&request(Some(""), Some("img"))).map(|i| i.requires_build),
            Ok(false)
        );
    }

    #[test]
    fn both_sources_conflict() {
        assert_eq!(
            resolve(&request(Some("r"), Some("img"))),
            Err(Error::ConflictingImageSource)
        );
    }

    #[test]
    fn no_docker_only_works_with_existing_images() {
        let mut req = request(Some("r"), None);
        req.no_docker = true;
        assert_eq!(resolve(&req), Err(Error::NoDockerWithRegistry));

        let mut req = request(None, Some("img"));
        req.no_docker = true;
        assert!(resolve(&req).is_ok());
    }
}
