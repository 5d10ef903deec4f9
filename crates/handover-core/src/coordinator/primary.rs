//! Primary 端流程

use super::attempt::{Attempt, AttemptReport, Phase};
use super::{HandoverCoordinator, HandoverError, Role, expect_attempt, unexpected};
use crate::codec::FrameWriter;
use crate::registry::TypeCategory;
use crate::transport::{PeerMessage, StartStatus, Transport};
use log::{debug, info, trace, warn};
use uuid::Uuid;

impl HandoverCoordinator {
    /// 作为 Primary 发起一次切换
    ///
    /// 成功时本端成为 Secondary；失败时两端保持原角色。
    pub async fn initiate<T>(&mut self, transport: &mut T) -> Result<AttemptReport, HandoverError>
    where
        T: Transport + ?Sized,
    {
        if self.role != Role::Primary {
            return Err(HandoverError::WrongRole(self.role));
        }

        let mut attempt = Attempt::new(Uuid::new_v4(), Role::Secondary, self.snapshot());
        info!(
            "Starting handover {} with {} link(s)",
            attempt.id,
            attempt.links.len()
        );
        self.enter(&mut attempt, Phase::Setup);

        let limit = self.config.attempt_timeout;
        let result = match tokio::time::timeout(limit, self.drive_primary(&mut attempt, transport))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(HandoverError::Timeout(limit)),
        };

        match result {
            Ok(()) => {
                // CommitInd 开始发送后不可撤回：无论发送结果如何都提交，
                // 也不会再在这条连接上发送 CancelInd
                let commit = PeerMessage::CommitInd {
                    attempt: attempt.id,
                };
                if let Err(e) = transport.send(commit).await {
                    warn!("CommitInd for {} not confirmed: {e}", attempt.id);
                }
                Ok(self.complete(&mut attempt))
            }
            Err(error) => {
                self.abort(&mut attempt, &error, transport).await;
                Err(error)
            }
        }
    }

    async fn drive_primary<T>(
        &mut self,
        attempt: &mut Attempt,
        transport: &mut T,
    ) -> Result<(), HandoverError>
    where
        T: Transport + ?Sized,
    {
        self.self_veto(&attempt.links)?;
        self.enter(attempt, Phase::Veto);
        self.veto_all(&attempt.links)?;

        self.enter(attempt, Phase::Negotiate);
        let request = PeerMessage::StartReq {
            attempt: attempt.id,
            fingerprint: self.registry.catalog().fingerprint(),
            links: attempt.links.clone(),
        };
        transport.send(request).await?;

        let reply = transport.recv().await?;
        expect_attempt(attempt, &reply)?;
        match reply {
            PeerMessage::StartCfm {
                status: StartStatus::Accepted,
                ..
            } => attempt.peer_engaged = true,
            PeerMessage::StartCfm { status, .. } => return Err(HandoverError::PeerRejected(status)),
            other => return Err(unexpected(&other, attempt.phase)),
        }

        self.enter(attempt, Phase::Marshal);
        let outbound = self.marshal_links(attempt)?;

        self.enter(attempt, Phase::Transfer);
        for message in outbound {
            transport.send(message).await?;
        }

        self.enter(attempt, Phase::AwaitCommit);
        let reply = transport.recv().await?;
        expect_attempt(attempt, &reply)?;
        match reply {
            PeerMessage::UnmarshalCfm { ok: true, .. } => {}
            PeerMessage::UnmarshalCfm { ok: false, .. } => {
                return Err(HandoverError::PeerUnmarshalFailed);
            }
            PeerMessage::CancelInd { reason, .. } => return Err(HandoverError::PeerCancelled(reason)),
            other => return Err(unexpected(&other, attempt.phase)),
        }

        // 传输期间其他任务可能改变了组件状态，提交前重新否决
        self.enter(attempt, Phase::Veto);
        self.veto_all(&attempt.links)

    }

    /// 把所有 (链路, 类型) 编码为帧消息
    ///
    /// 在一个同步步骤中完成，组件借出的源数据不会跨越等待点。
    fn marshal_links(&self, attempt: &mut Attempt) -> Result<Vec<PeerMessage>, HandoverError> {
        let mut outbound = Vec::new();

        for index in 0..attempt.links.len() {
            let link = attempt.links[index].clone();
            let first_of_class = attempt.is_first_of_class(index);
            let mut writer = FrameWriter::new(self.config.max_frame_size);

            for (id, component) in self.registry.iterate(Some(link.class)) {
                for entry in self.registry.catalog().types_of(id) {
                    if entry.category() == TypeCategory::Generic && !first_of_class {
                        continue;
                    }

                    attempt.participants.insert(id);
                    let Some(data) = component.marshal(&link, entry) else {
                        continue;
                    };

                    let codec_error = |source| HandoverError::Codec {
                        link: link.key(),
                        source,
                    };
                    let payload = entry.encode(data.as_any()).map_err(codec_error)?;
                    writer.push(entry.id(), &payload).map_err(codec_error)?;

                    trace!(
                        "Marshalled {} ({} bytes) from '{}' on {}",
                        entry.name(),
                        payload.len(),
                        component.name(),
                        link
                    );
                    attempt.records += 1;
                    attempt.bytes += payload.len();
                }
            }

            let frames = writer.finish();
            let count = frames.len();
            debug!("{} marshalled into {} frame(s)", link, count);
            attempt.frames += count;
            for (i, frame) in frames.into_iter().enumerate() {
                outbound.push(PeerMessage::MarshalData {
                    attempt: attempt.id,
                    link: link.key(),
                    frame,
                    last: i + 1 == count,
                });
            }
        }

        Ok(outbound)
    }
}
