//! Secondary 端流程

use super::attempt::{Attempt, AttemptReport, Inbound, Phase};
use super::{HandoverCoordinator, HandoverError, Role, expect_attempt, unexpected};
use crate::codec::RecordReader;
use crate::link::Link;
use crate::registry::{CatalogFingerprint, DecodedObject, TypeCategory, UnmarshalOutcome};
use crate::transport::{PeerMessage, StartStatus, Transport};
use log::{debug, info, trace};
use std::collections::HashSet;

impl HandoverCoordinator {
    /// 等待对端的 StartReq 并作为 Secondary 参与切换
    ///
    /// 等待 StartReq 不受监督定时器限制。
    pub async fn accept<T>(&mut self, transport: &mut T) -> Result<AttemptReport, HandoverError>
    where
        T: Transport + ?Sized,
    {
        let request = transport.recv().await?;
        self.respond(request, transport).await
    }

    /// 处理已收到的 StartReq
    ///
    /// 成功时本端成为 Primary；失败时两端保持原角色。
    pub async fn respond<T>(
        &mut self,
        request: PeerMessage,
        transport: &mut T,
    ) -> Result<AttemptReport, HandoverError>
    where
        T: Transport + ?Sized,
    {
        let (id, fingerprint, links) = match request {
            PeerMessage::StartReq {
                attempt,
                fingerprint,
                links,
            } => (attempt, fingerprint, links),
            other => return Err(unexpected(&other, Phase::Setup)),
        };

        let mut attempt = Attempt::new(id, Role::Primary, links);
        info!(
            "Peer requested handover {} with {} link(s)",
            attempt.id,
            attempt.links.len()
        );
        self.enter(&mut attempt, Phase::Setup);

        if let Err(error) = self.check_request(&attempt, fingerprint) {
            let reply = PeerMessage::StartCfm {
                attempt: id,
                status: start_status(&error),
            };
            if let Err(e) = transport.send(reply).await {
                debug!("StartCfm not delivered: {e}");
            }
            self.abort(&mut attempt, &error, transport).await;
            return Err(error);
        }

        let limit = self.config.attempt_timeout;
        let result = match tokio::time::timeout(limit, self.drive_secondary(&mut attempt, transport))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(HandoverError::Timeout(limit)),
        };

        match result {
            Ok(()) => Ok(self.complete(&mut attempt)),
            Err(error) => {
                self.abort(&mut attempt, &error, transport).await;
                Err(error)
            }
        }
    }

    /// 角色、目录指纹、链路列表、自身否决与组件否决
    fn check_request(
        &self,
        attempt: &Attempt,
        fingerprint: CatalogFingerprint,
    ) -> Result<(), HandoverError> {
        if self.role != Role::Secondary {
            return Err(HandoverError::WrongRole(self.role));
        }

        let ours = self.registry.catalog().fingerprint();
        if ours != fingerprint {
            return Err(HandoverError::BuildMismatch {
                ours,
                theirs: fingerprint,
            });
        }

        // 同一链路出现两次时，第二份数据永远等不到
        let mut keys = HashSet::new();
        if let Some(link) = attempt.links.iter().find(|l| !keys.insert(l.key())) {
            return Err(HandoverError::Protocol(format!(
                "link {} listed twice in StartReq",
                link.key()
            )));
        }

        self.self_veto(&attempt.links)?;
        self.veto_all(&attempt.links)
    }

    async fn drive_secondary<T>(
        &mut self,
        attempt: &mut Attempt,
        transport: &mut T,
    ) -> Result<(), HandoverError>
    where
        T: Transport + ?Sized,
    {
        self.enter(attempt, Phase::Negotiate);
        let reply = PeerMessage::StartCfm {
            attempt: attempt.id,
            status: StartStatus::Accepted,
        };
        transport.send(reply).await?;
        attempt.peer_engaged = true;

        self.enter(attempt, Phase::Transfer);
        let mut open: Vec<bool> = vec![true; attempt.links.len()];
        let mut seen = HashSet::new();
        while open.iter().any(|o| *o) {
            let message = transport.recv().await?;
            expect_attempt(attempt, &message)?;
            match message {
                PeerMessage::MarshalData {
                    link, frame, last, ..
                } => {
                    let index = attempt
                        .link_index(&link)
                        .filter(|i| open[*i])
                        .ok_or_else(|| {
                            HandoverError::Protocol(format!("data for closed or unknown link {link}"))
                        })?;
                    self.decode_frame(attempt, index, &frame, &mut seen)?;
                    if last {
                        open[index] = false;
                    }
                }
                PeerMessage::CancelInd { reason, .. } => {
                    return Err(HandoverError::PeerCancelled(reason));
                }
                other => return Err(unexpected(&other, attempt.phase)),
            }
        }

        self.enter(attempt, Phase::Unmarshal);
        let delivered = self.unmarshal_inbound(attempt);
        let ok = delivered.is_ok();
        let confirm = PeerMessage::UnmarshalCfm {
            attempt: attempt.id,
            ok,
        };
        if ok {
            transport.send(confirm).await?;
        } else {
            // 对端收到 ok = false 后自行中止，不再需要 CancelInd
            attempt.peer_engaged = false;
            if let Err(e) = transport.send(confirm).await {
                debug!("UnmarshalCfm not delivered: {e}");
            }
        }
        delivered?;

        self.enter(attempt, Phase::AwaitCommit);
        let message = transport.recv().await?;
        expect_attempt(attempt, &message)?;
        match message {
            PeerMessage::CommitInd { .. } => Ok(()),
            PeerMessage::CancelInd { reason, .. } => Err(HandoverError::PeerCancelled(reason)),
            other => Err(unexpected(&other, attempt.phase)),
        }
    }

    /// 解码一帧中的所有记录，解码对象暂存在尝试中
    fn decode_frame(
        &self,
        attempt: &mut Attempt,
        index: usize,
        frame: &[u8],
        seen: &mut HashSet<(usize, u16)>,
    ) -> Result<(), HandoverError> {
        let key = attempt.links[index].key();
        let first_of_class = attempt.is_first_of_class(index);

        for record in RecordReader::new(frame) {
            let record = record.map_err(|source| HandoverError::Codec { link: key, source })?;
            let entry = self
                .registry
                .catalog()
                .find(record.type_id)
                .ok_or(HandoverError::UnknownType {
                    link: key,
                    type_id: record.type_id,
                })?;

            let owner = self
                .registry
                .component(entry.owner())
                .ok_or(HandoverError::UnknownType {
                    link: key,
                    type_id: record.type_id,
                })?;
            if !owner.applicability().covers(key.class) {
                return Err(HandoverError::Protocol(format!(
                    "'{}' received on {} link",
                    entry.name(),
                    key.class
                )));
            }
            if entry.category() == TypeCategory::Generic && !first_of_class {
                return Err(HandoverError::Protocol(format!(
                    "generic '{}' on non-first {} link",
                    entry.name(),
                    key.class
                )));
            }
            if !seen.insert((index, record.type_id.0)) {
                return Err(HandoverError::Protocol(format!(
                    "'{}' received twice on {}",
                    entry.name(),
                    key
                )));
            }

            let value = entry
                .decode(record.payload)
                .map_err(|source| HandoverError::Codec { link: key, source })?;
            trace!("Decoded {} ({} bytes) on {}", entry.name(), record.payload.len(), key);

            attempt.records += 1;
            attempt.bytes += record.payload.len();
            attempt.ownership.decoded += 1;
            attempt.inbound.push(Inbound {
                link: index,
                entry: entry.clone(),
                object: DecodedObject::new(record.type_id, value),
            });
        }

        attempt.frames += 1;
        Ok(())
    }

    /// 按接收顺序把解码对象交给各自的组件
    fn unmarshal_inbound(&mut self, attempt: &mut Attempt) -> Result<(), HandoverError> {
        let mut pending = std::mem::take(&mut attempt.inbound).into_iter();

        while let Some(Inbound {
            link,
            entry,
            object,
        }) = pending.next()
        {
            let link: &Link = &attempt.links[link];
            let owner = entry.owner();
            let Some(component) = self.registry.component_mut(owner) else {
                attempt.ownership.released += 1 + pending.len();
                return Err(HandoverError::UnknownType {
                    link: link.key(),
                    type_id: entry.id(),
                });
            };

            attempt.participants.insert(owner);
            match component.unmarshal(link, &entry, object) {
                UnmarshalOutcome::Adopted => attempt.ownership.adopted += 1,
                UnmarshalOutcome::Retained(object) => {
                    drop(object);
                    attempt.ownership.released += 1;
                }
                UnmarshalOutcome::Failure(object) => {
                    drop(object);
                    attempt.ownership.released += 1 + pending.len();
                    return Err(HandoverError::UnmarshalFailed {
                        component: component.name(),
                        type_name: entry.name(),
                        link: link.key(),
                    });
                }
            }
        }

        debug!(
            "Unmarshal done: {} decoded, {} adopted",
            attempt.ownership.decoded, attempt.ownership.adopted
        );
        Ok(())
    }
}

/// 启动检查失败时回给对端的状态
fn start_status(error: &HandoverError) -> StartStatus {
    match error {
        HandoverError::WrongRole(_) => StartStatus::WrongRole,
        HandoverError::BuildMismatch { .. } => StartStatus::BuildMismatch,
        HandoverError::Protocol(_) => StartStatus::Malformed,
        _ => StartStatus::Vetoed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::CoordinatorConfig;
    use crate::link::{BdAddr, LinkTable};
    use crate::registry::{Applicability, HandoverComponent, Registry, TypeDescriptor, TypeEntry};
    use crate::transport::ChannelTransport;
    use std::sync::Arc;
    use uuid::Uuid;

    /// 第一次 Unmarshal 接管对象，之后全部失败
    struct AdoptThenFail {
        calls: usize,
    }

    impl HandoverComponent for AdoptThenFail {
        fn name(&self) -> &'static str {
            "adopt-then-fail"
        }

        fn applicability(&self) -> Applicability {
            Applicability::BrEdr
        }

        fn types(&self) -> Vec<TypeDescriptor> {
            vec![TypeDescriptor::per_instance::<u32>("test.counter")]
        }

        fn veto(&self, _link: Option<&Link>) -> bool {
            false
        }

        fn unmarshal(
            &mut self,
            _link: &Link,
            _ty: &TypeEntry,
            object: DecodedObject,
        ) -> UnmarshalOutcome {
            self.calls += 1;
            if self.calls == 1 {
                UnmarshalOutcome::Adopted
            } else {
                UnmarshalOutcome::Failure(object)
            }
        }

        fn commit(&mut self, _is_primary: bool) {}
    }

    fn coordinator() -> HandoverCoordinator {
        let registry = Registry::builder()
            .register(AdoptThenFail { calls: 0 })
            .build()
            .unwrap();
        HandoverCoordinator::new(
            registry,
            Arc::new(LinkTable::new()),
            Role::Secondary,
            CoordinatorConfig::default(),
        )
    }

    fn bredr(last: u8) -> Link {
        Link::bredr(BdAddr::new([0x00, 0x1A, 0x7D, 0xDA, 0x71, last]))
    }

    #[test]
    fn test_unmarshal_failure_after_adoption_stays_balanced() {
        let mut coordinator = coordinator();
        let entry = coordinator
            .registry()
            .catalog()
            .find_by_name("test.counter")
            .unwrap()
            .clone();

        let mut attempt = Attempt::new(Uuid::nil(), Role::Primary, vec![bredr(1), bredr(2), bredr(3)]);
        for (link, value) in [1u32, 2, 3].into_iter().enumerate() {
            attempt.ownership.decoded += 1;
            attempt.inbound.push(Inbound {
                link,
                entry: entry.clone(),
                object: DecodedObject::new(entry.id(), Box::new(value)),
            });
        }

        // Adopted → Failure → 第三个对象未交付
        let error = coordinator.unmarshal_inbound(&mut attempt).unwrap_err();
        assert!(matches!(
            error,
            HandoverError::UnmarshalFailed {
                component: "adopt-then-fail",
                ..
            }
        ));
        assert!(attempt.inbound.is_empty());

        let stats = attempt.ownership();
        assert_eq!(stats.adopted, 1);
        assert_eq!(stats.released, 2);
        assert!(stats.is_balanced());

        // 中止路径不会重复释放
        attempt.release_inbound();
        assert!(attempt.ownership().is_balanced());
    }

    #[tokio::test]
    async fn test_duplicate_link_is_rejected_immediately() {
        let mut coordinator = coordinator();
        let fingerprint = coordinator.registry().catalog().fingerprint();
        let request = PeerMessage::StartReq {
            attempt: Uuid::new_v4(),
            fingerprint,
            links: vec![bredr(1), bredr(2), bredr(1)],
        };

        let (mut a, mut b) = ChannelTransport::pair();
        let started = std::time::Instant::now();
        let error = coordinator.respond(request, &mut b).await.unwrap_err();
        assert!(matches!(error, HandoverError::Protocol(_)));
        assert!(started.elapsed() < coordinator.config().attempt_timeout);
        assert_eq!(coordinator.role(), Role::Secondary);

        match a.recv().await.unwrap() {
            PeerMessage::StartCfm { status, .. } => assert_eq!(status, StartStatus::Malformed),
            other => panic!("unexpected {}", other.kind()),
        }
    }
}
