//! Load-balancer exposure and deletion waits for Services
//!
//! Each operation is one polling session over the [`ServiceSource`] seam:
//! fetch a fresh snapshot, decide converged / not yet, and let the poller
//! handle transient API failures and the deadline. Timeouts default to the
//! values cloud load balancers actually need (minutes, not seconds).

use std::env;
use std::time::Duration;

use k8s_openapi::api::core::v1::Service;
use tracing::{debug, info};

use crate::error::Error;
use crate::poll::{poll_immediate, PollConfig, Probe};
use crate::source::ServiceSource;

/// Poll interval for Service state
pub const SERVICE_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Timeout for load-balancer exposure
pub const SERVICE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Timeout for load-balancer exposure on basic-SKU load balancers
pub const SERVICE_TIMEOUT_BASIC_LB: Duration = Duration::from_secs(10 * 60);

/// Timeout for Service deletion (cloud load-balancer teardown is the slow path)
pub const DELETION_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Environment variable naming the load-balancer SKU under test
pub const LOAD_BALANCER_SKU_ENV: &str = "LOADBALANCER_SKU";

/// Poll configuration for exposure waits
///
/// Basic-SKU load balancers converge noticeably slower than standard ones,
/// so when [`LOAD_BALANCER_SKU_ENV`] says `basic` the session gets the longer
/// timeout.
pub fn exposure_poll_config() -> PollConfig {
    let timeout = match env::var(LOAD_BALANCER_SKU_ENV) {
        Ok(sku) if sku.eq_ignore_ascii_case("basic") => SERVICE_TIMEOUT_BASIC_LB,
        _ => SERVICE_TIMEOUT,
    };
    PollConfig::new(SERVICE_POLL_INTERVAL, timeout)
}

/// First load-balancer ingress address of a Service, if any
///
/// Prefers the IP; clouds that front services with DNS names publish a
/// hostname instead, which is returned as the fallback.
pub fn ingress_address(service: &Service) -> Option<String> {
    let first = service
        .status
        .as_ref()?
        .load_balancer
        .as_ref()?
        .ingress
        .as_ref()?
        .first()?;
    first.ip.clone().or_else(|| first.hostname.clone())
}

/// Probe one snapshot for its first ingress address, with a reason per
/// distinct "not yet" shape.
fn first_address(service: &Service, namespace: &str, name: &str) -> Probe<String> {
    let ingress = service
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref());

    let Some(list) = ingress else {
        return Probe::Pending(format!(
            "service {}/{} has no load-balancer status yet",
            namespace, name
        ));
    };
    match list.first() {
        None => Probe::Pending(format!(
            "service {}/{} load-balancer ingress list is empty",
            namespace, name
        )),
        Some(entry) => match entry.ip.clone().or_else(|| entry.hostname.clone()) {
            Some(address) => Probe::Ready(address),
            None => Probe::Pending(format!(
                "service {}/{} first ingress entry has no address",
                namespace, name
            )),
        },
    }
}

/// Wait until a Service is exposed and return its external address
///
/// Polls the Service until `status.loadBalancer.ingress` carries an entry
/// with an address; the first entry's address is the result.
pub async fn wait_for_external_ip<S: ServiceSource + ?Sized>(
    source: &S,
    namespace: &str,
    name: &str,
    config: PollConfig,
) -> Result<String, Error> {
    let condition = format!("service {}/{} to be exposed", namespace, name);
    let address = poll_immediate(config, &condition, Error::is_retryable, || async move {
        let service = source.get(namespace, name).await?;
        Ok(first_address(&service, namespace, name))
    })
    .await?;

    info!(namespace, name, %address, "service exposed");
    Ok(address)
}

/// Wait until the first ingress address equals `target`
///
/// Used after an update that pins a Service to a pre-allocated address, to
/// confirm the load balancer settled on it.
pub async fn wait_for_ip_equal<S: ServiceSource + ?Sized>(
    source: &S,
    namespace: &str,
    name: &str,
    target: &str,
    config: PollConfig,
) -> Result<(), Error> {
    let condition = format!(
        "service {}/{} ingress address to equal {}",
        namespace, name, target
    );
    poll_immediate(config, &condition, Error::is_retryable, || async move {
        let service = source.get(namespace, name).await?;
        Ok(match first_address(&service, namespace, name) {
            Probe::Ready(address) if address == target => Probe::Ready(()),
            Probe::Ready(address) => Probe::Pending(format!(
                "ingress address is {}, want {}",
                address, target
            )),
            Probe::Pending(reason) => Probe::Pending(reason),
        })
    })
    .await?;

    info!(namespace, name, target, "ingress address matches");
    Ok(())
}

/// Wait until the first ingress address differs from `previous`
///
/// Used after an update that forces reassignment, to confirm the old address
/// was actually released.
pub async fn wait_for_ip_changed<S: ServiceSource + ?Sized>(
    source: &S,
    namespace: &str,
    name: &str,
    previous: &str,
    config: PollConfig,
) -> Result<(), Error> {
    let condition = format!(
        "service {}/{} ingress address to move off {}",
        namespace, name, previous
    );
    poll_immediate(config, &condition, Error::is_retryable, || async move {
        let service = source.get(namespace, name).await?;
        Ok(match first_address(&service, namespace, name) {
            Probe::Ready(address) if address != previous => Probe::Ready(()),
            Probe::Ready(address) => {
                Probe::Pending(format!("ingress address is still {}", address))
            }
            Probe::Pending(reason) => Probe::Pending(reason),
        })
    })
    .await?;

    info!(namespace, name, previous, "ingress address reassigned");
    Ok(())
}

/// Delete a Service and wait until the API stops returning it
///
/// Deletion is requested with a zero grace period; not-found is the terminal
/// expected state, so the wait treats it as success rather than an error.
pub async fn delete_service<S: ServiceSource + ?Sized>(
    source: &S,
    namespace: &str,
    name: &str,
    config: PollConfig,
) -> Result<(), Error> {
    info!(namespace, name, "deleting service");
    source.delete(namespace, name).await?;
    wait_for_deletion(source, namespace, name, config).await
}

/// Delete a Service if it exists; a missing Service is success
pub async fn delete_service_if_exists<S: ServiceSource + ?Sized>(
    source: &S,
    namespace: &str,
    name: &str,
    config: PollConfig,
) -> Result<(), Error> {
    match source.delete(namespace, name).await {
        Ok(()) => {
            info!(namespace, name, "deleting service");
            wait_for_deletion(source, namespace, name, config).await
        }
        Err(kube::Error::Api(resp)) if resp.code == 404 => {
            debug!(namespace, name, "service does not exist, nothing to delete");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

async fn wait_for_deletion<S: ServiceSource + ?Sized>(
    source: &S,
    namespace: &str,
    name: &str,
    config: PollConfig,
) -> Result<(), Error> {
    let condition = format!("service {}/{} to be deleted", namespace, name);
    poll_immediate(config, &condition, Error::is_retryable, || async move {
        match source.get(namespace, name).await {
            Ok(_) => Ok(Probe::Pending(format!(
                "service {}/{} still exists",
                namespace, name
            ))),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(Probe::Ready(())),
            Err(err) => Err(err.into()),
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, ServiceStatus};
    use kube::core::ErrorResponse;

    /// One scripted answer from the fake collaborator.
    #[derive(Clone)]
    enum Step {
        Svc(Service),
        ApiErr(u16, &'static str),
    }

    /// Scripted [`ServiceSource`]: answers `get`/`delete` from fixed
    /// sequences, repeating the final step once exhausted, and counts calls.
    struct FakeServices {
        gets: Vec<Step>,
        deletes: Vec<Option<(u16, &'static str)>>,
        get_calls: AtomicUsize,
        delete_calls: AtomicUsize,
    }

    impl FakeServices {
        fn new(gets: Vec<Step>) -> Self {
            Self {
                gets,
                deletes: vec![None],
                get_calls: AtomicUsize::new(0),
                delete_calls: AtomicUsize::new(0),
            }
        }

        fn with_deletes(mut self, deletes: Vec<Option<(u16, &'static str)>>) -> Self {
            self.deletes = deletes;
            self
        }

        fn get_count(&self) -> usize {
            self.get_calls.load(Ordering::SeqCst)
        }

        fn delete_count(&self) -> usize {
            self.delete_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ServiceSource for FakeServices {
        async fn get(&self, _namespace: &str, _name: &str) -> Result<Service, kube::Error> {
            let n = self.get_calls.fetch_add(1, Ordering::SeqCst);
            let step = self
                .gets
                .get(n)
                .or_else(|| self.gets.last())
                .expect("fake needs at least one get step");
            match step {
                Step::Svc(svc) => Ok(svc.clone()),
                Step::ApiErr(code, reason) => Err(api_error(*code, reason)),
            }
        }

        async fn delete(&self, _namespace: &str, _name: &str) -> Result<(), kube::Error> {
            let n = self.delete_calls.fetch_add(1, Ordering::SeqCst);
            let step = self
                .deletes
                .get(n)
                .or_else(|| self.deletes.last())
                .expect("fake needs at least one delete step");
            match step {
                None => Ok(()),
                Some((code, reason)) => Err(api_error(*code, reason)),
            }
        }
    }

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{} ({})", reason, code),
            reason: reason.to_string(),
            code,
        })
    }

    fn exposed(ip: Option<&str>, hostname: Option<&str>) -> Service {
        Service {
            status: Some(ServiceStatus {
                load_balancer: Some(LoadBalancerStatus {
                    ingress: Some(vec![LoadBalancerIngress {
                        ip: ip.map(str::to_string),
                        hostname: hostname.map(str::to_string),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn unexposed() -> Service {
        Service {
            status: Some(ServiceStatus {
                load_balancer: Some(LoadBalancerStatus {
                    ingress: Some(vec![]),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn fast() -> PollConfig {
        PollConfig::new(Duration::from_millis(5), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn external_ip_survives_transient_failures() {
        let fake = FakeServices::new(vec![
            Step::ApiErr(503, "ServiceUnavailable"),
            Step::Svc(unexposed()),
            Step::Svc(exposed(Some("203.0.113.5"), None)),
        ]);

        let ip = wait_for_external_ip(&fake, "default", "web", fast())
            .await
            .unwrap();

        assert_eq!(ip, "203.0.113.5");
        assert_eq!(fake.get_count(), 3);
    }

    #[tokio::test]
    async fn external_ip_aborts_on_fatal_error() {
        let fake = FakeServices::new(vec![Step::ApiErr(403, "Forbidden")]);

        let err = wait_for_external_ip(&fake, "default", "web", fast())
            .await
            .unwrap_err();

        match err {
            Error::Kube {
                source: kube::Error::Api(resp),
            } => assert_eq!(resp.code, 403),
            other => panic!("expected kube api error, got {:?}", other),
        }
        assert_eq!(fake.get_count(), 1);
    }

    #[tokio::test]
    async fn external_ip_falls_back_to_hostname() {
        let fake = FakeServices::new(vec![Step::Svc(exposed(None, Some("lb.example.com")))]);

        let address = wait_for_external_ip(&fake, "default", "web", fast())
            .await
            .unwrap();

        assert_eq!(address, "lb.example.com");
    }

    #[tokio::test]
    async fn external_ip_deadline_names_the_missing_ingress() {
        let fake = FakeServices::new(vec![Step::Svc(unexposed())]);
        let config = PollConfig::new(Duration::from_millis(10), Duration::from_millis(30));

        let err = wait_for_external_ip(&fake, "default", "web", config)
            .await
            .unwrap_err();

        match err {
            Error::DeadlineExceeded { last_reason, .. } => {
                let reason = last_reason.expect("reason retained");
                assert!(reason.contains("ingress"), "reason was {:?}", reason);
            }
            other => panic!("expected deadline exceeded, got {:?}", other),
        }
        assert!(fake.get_count() >= 1);
    }

    #[tokio::test]
    async fn ip_equal_waits_for_the_target_address() {
        let fake = FakeServices::new(vec![
            Step::Svc(exposed(Some("10.0.0.1"), None)),
            Step::Svc(exposed(Some("10.0.0.1"), None)),
            Step::Svc(exposed(Some("10.0.0.2"), None)),
        ]);

        wait_for_ip_equal(&fake, "default", "web", "10.0.0.2", fast())
            .await
            .unwrap();

        assert_eq!(fake.get_count(), 3);
    }

    #[tokio::test]
    async fn ip_changed_waits_until_reassignment() {
        let fake = FakeServices::new(vec![
            Step::Svc(exposed(Some("10.0.0.1"), None)),
            Step::Svc(exposed(Some("10.0.0.1"), None)),
            Step::Svc(exposed(Some("198.51.100.7"), None)),
        ]);

        wait_for_ip_changed(&fake, "default", "web", "10.0.0.1", fast())
            .await
            .unwrap();

        assert_eq!(fake.get_count(), 3);
    }

    #[tokio::test]
    async fn delete_waits_for_not_found() {
        let fake = FakeServices::new(vec![
            Step::Svc(unexposed()),
            Step::ApiErr(404, "NotFound"),
        ]);

        delete_service(&fake, "default", "web", fast()).await.unwrap();

        assert_eq!(fake.delete_count(), 1);
        assert_eq!(fake.get_count(), 2);
    }

    #[tokio::test]
    async fn delete_if_exists_tolerates_absent_service() {
        let fake = FakeServices::new(vec![Step::ApiErr(404, "NotFound")])
            .with_deletes(vec![Some((404, "NotFound"))]);

        delete_service_if_exists(&fake, "default", "web", fast())
            .await
            .unwrap();

        assert_eq!(fake.delete_count(), 1);
        assert_eq!(fake.get_count(), 0);
    }

    #[tokio::test]
    async fn delete_propagates_fatal_errors() {
        let fake = FakeServices::new(vec![Step::Svc(unexposed())])
            .with_deletes(vec![Some((403, "Forbidden"))]);

        let err = delete_service(&fake, "default", "web", fast())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Kube {
                source: kube::Error::Api(resp)
            } if resp.code == 403
        ));
        assert_eq!(fake.get_count(), 0);
    }

    #[test]
    fn exposure_config_follows_load_balancer_sku() {
        env::remove_var(LOAD_BALANCER_SKU_ENV);
        assert_eq!(exposure_poll_config().timeout, SERVICE_TIMEOUT);

        env::set_var(LOAD_BALANCER_SKU_ENV, "Basic");
        assert_eq!(exposure_poll_config().timeout, SERVICE_TIMEOUT_BASIC_LB);

        env::set_var(LOAD_BALANCER_SKU_ENV, "standard");
        assert_eq!(exposure_poll_config().timeout, SERVICE_TIMEOUT);

        env::remove_var(LOAD_BALANCER_SKU_ENV);
    }

    #[test]
    fn ingress_address_prefers_ip() {
        let svc = exposed(Some("203.0.113.5"), Some("lb.example.com"));
        assert_eq!(ingress_address(&svc).as_deref(), Some("203.0.113.5"));

        let svc = exposed(None, Some("lb.example.com"));
        assert_eq!(ingress_address(&svc).as_deref(), Some("lb.example.com"));

        assert_eq!(ingress_address(&unexposed()), None);
        assert_eq!(ingress_address(&Service::default()), None);
    }
}
