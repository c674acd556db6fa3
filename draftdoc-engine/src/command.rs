use std::collections::HashMap;

use draftdoc_core::document::ReorderAction;
use draftdoc_core::geometry::Point2;

use crate::Engine;
use crate::session::{Modifiers, TransformBegin, TransformMode};

#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub name: String,
    pub args: Vec<String>,
}

impl CommandRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandResponse {
    pub success: bool,
    pub message: Option<String>,
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse;
}

pub struct CommandContext<'a> {
    pub engine: &'a mut Engine,
}

/// 基于 [`Engine`] 的具名编辑命令，供菜单、脚本或控制台驱动文档。
pub struct CommandBus {
    handlers: HashMap<&'static str, Box<dyn CommandHandler>>,
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBus {
    pub fn new() -> Self {
        let mut bus = Self {
            handlers: HashMap::new(),
        };
        bus.register(UndoCommand);
        bus.register(RedoCommand);
        bus.register(ClearSelectionCommand);
        bus.register(SelectAllCommand);
        bus.register(DeleteSelectionCommand);
        bus.register(MoveSelectionCommand);
        bus.register(ReorderCommand {
            name: "bring_to_front",
            action: ReorderAction::BringToFront,
        });
        bus.register(ReorderCommand {
            name: "send_to_back",
            action: ReorderAction::SendToBack,
        });
        bus.register(ReorderCommand {
            name: "bring_forward",
            action: ReorderAction::BringForward,
        });
        bus.register(ReorderCommand {
            name: "send_backward",
            action: ReorderAction::SendBackward,
        });
        bus
    }

    pub fn register<H: CommandHandler + 'static>(&mut self, handler: H) {
        self.handlers.insert(handler.name(), Box::new(handler));
    }

    pub fn dispatch(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        if let Some(handler) = self.handlers.get(request.name.as_str()) {
            handler.execute(request, context)
        } else {
            CommandResponse::err(format!("未知命令: {}", request.name))
        }
    }

    pub fn available_commands(&self) -> impl Iterator<Item = &&'static str> {
        self.handlers.keys()
    }
}

struct UndoCommand;

impl CommandHandler for UndoCommand {
    fn name(&self) -> &'static str {
        "undo"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        if context.engine.undo() {
            CommandResponse::ok("已撤销")
        } else {
            CommandResponse::err("没有可撤销的操作")
        }
    }
}

struct RedoCommand;

impl CommandHandler for RedoCommand {
    fn name(&self) -> &'static str {
        "redo"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        if context.engine.redo() {
            CommandResponse::ok("已重做")
        } else {
            CommandResponse::err("没有可重做的操作")
        }
    }
}

struct ClearSelectionCommand;

impl CommandHandler for ClearSelectionCommand {
    fn name(&self) -> &'static str {
        "clear_selection"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        context.engine.clear_selection();
        CommandResponse::ok("选中集已清空")
    }
}

struct SelectAllCommand;

impl CommandHandler for SelectAllCommand {
    fn name(&self) -> &'static str {
        "select_all"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        context.engine.select_all();
        CommandResponse::ok(format!("已选中 {} 个实体", context.engine.selection().len()))
    }
}

struct DeleteSelectionCommand;

impl CommandHandler for DeleteSelectionCommand {
    fn name(&self) -> &'static str {
        "delete_selection"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let ids = context.engine.selection().to_vec();
        if ids.is_empty() {
            return CommandResponse::err("选中集为空");
        }
        match context.engine.delete_entities(&ids) {
            Ok(count) => CommandResponse::ok(format!("已删除 {count} 个实体")),
            Err(err) => CommandResponse::err(err.to_string()),
        }
    }
}

/// `move_selection <dx> <dy>`：按给定偏移平移选中集，记为一次可撤销操作。
struct MoveSelectionCommand;

impl CommandHandler for MoveSelectionCommand {
    fn name(&self) -> &'static str {
        "move_selection"
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let [dx, dy] = match request.args.as_slice() {
            [dx, dy] => match (dx.parse::<f32>(), dy.parse::<f32>()) {
                (Ok(dx), Ok(dy)) => [dx, dy],
                _ => return CommandResponse::err("偏移量必须是数字"),
            },
            _ => return CommandResponse::err("用法: move_selection <dx> <dy>"),
        };
        let engine = &mut *context.engine;
        let ids = engine.selection().to_vec();
        let request = TransformBegin::new(ids, TransformMode::Move, Point2::ORIGIN);
        // 数值平移不参与捕捉。
        let moved = engine
            .begin_transform(request)
            .and_then(|()| engine.update_transform(Point2::new(dx, dy), Modifiers::CTRL))
            .and_then(|()| engine.commit_transform());
        match moved {
            Ok(_) => CommandResponse::ok(format!("选中集已平移 ({dx}, {dy})")),
            Err(err) => {
                // 失败时不留下半途的会话。
                let _ = engine.cancel_transform();
                CommandResponse::err(err.to_string())
            }
        }
    }
}

struct ReorderCommand {
    name: &'static str,
    action: ReorderAction,
}

impl CommandHandler for ReorderCommand {
    fn name(&self) -> &'static str {
        self.name
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let ids = context.engine.selection().to_vec();
        match context.engine.reorder(&ids, self.action) {
            Ok(true) => CommandResponse::ok("绘制顺序已更新"),
            Ok(false) => CommandResponse::ok("绘制顺序未变"),
            Err(err) => CommandResponse::err(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::SelectionMode;
    use draftdoc_core::document::EntityId;
    use draftdoc_core::shape::RectRecord;

    fn engine_with_two_rects() -> Engine {
        let mut engine = Engine::new();
        engine
            .upsert_rect(EntityId::new(1), RectRecord::new(0.0, 0.0, 10.0, 10.0))
            .unwrap();
        engine
            .upsert_rect(EntityId::new(2), RectRecord::new(20.0, 0.0, 10.0, 10.0))
            .unwrap();
        engine
    }

    #[test]
    fn selection_commands_work() {
        let mut engine = engine_with_two_rects();
        let bus = CommandBus::new();
        let mut context = CommandContext { engine: &mut engine };

        let response = bus.dispatch(&CommandRequest::new("select_all"), &mut context);
        assert!(response.success);
        assert_eq!(context.engine.selection().len(), 2);

        let response = bus.dispatch(&CommandRequest::new("clear_selection"), &mut context);
        assert!(response.success);
        assert!(context.engine.selection().is_empty());

        let response = bus.dispatch(&CommandRequest::new("delete_selection"), &mut context);
        assert!(!response.success);
    }

    #[test]
    fn move_and_undo_round_trip() {
        let mut engine = engine_with_two_rects();
        engine.set_selection(&[EntityId::new(1)], SelectionMode::Replace);
        let bus = CommandBus::new();
        let mut context = CommandContext { engine: &mut engine };

        let response = bus.dispatch(
            &CommandRequest::with_args("move_selection", ["5", "-2"]),
            &mut context,
        );
        assert!(response.success, "{:?}", response.message);
        let rect = *context.engine.document().rect(EntityId::new(1)).unwrap();
        assert_eq!((rect.x, rect.y), (5.0, -2.0));

        assert!(bus.dispatch(&CommandRequest::new("undo"), &mut context).success);
        assert_eq!(context.engine.document().rect(EntityId::new(1)).unwrap().x, 0.0);
        assert!(bus.dispatch(&CommandRequest::new("redo"), &mut context).success);
        assert_eq!(context.engine.document().rect(EntityId::new(1)).unwrap().x, 5.0);

        let response = bus.dispatch(
            &CommandRequest::with_args("move_selection", ["x"]),
            &mut context,
        );
        assert!(!response.success);
    }

    #[test]
    fn numeric_moves_are_exact_with_snapping_on() {
        let mut engine = Engine::with_options(crate::EngineOptions {
            snap: crate::snap::SnapOptions {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        });
        engine
            .upsert_rect(EntityId::new(1), RectRecord::new(0.0, 0.0, 10.0, 10.0))
            .unwrap();
        engine
            .upsert_rect(EntityId::new(2), RectRecord::new(20.0, 0.0, 10.0, 10.0))
            .unwrap();
        engine.set_selection(&[EntityId::new(1)], SelectionMode::Replace);
        let bus = CommandBus::new();
        let mut context = CommandContext { engine: &mut engine };

        let request = CommandRequest::with_args("move_selection", ["5", "0"]);
        assert!(bus.dispatch(&request, &mut context).success);
        assert_eq!(context.engine.document().rect(EntityId::new(1)).unwrap().x, 5.0);
    }

    #[test]
    fn reorder_and_unknown_commands() {
        let mut engine = engine_with_two_rects();
        engine.set_selection(&[EntityId::new(1)], SelectionMode::Replace);
        let bus = CommandBus::new();
        let mut context = CommandContext { engine: &mut engine };

        assert!(bus.dispatch(&CommandRequest::new("bring_to_front"), &mut context).success);
        assert_eq!(
            context.engine.document().draw_order(),
            &[EntityId::new(2), EntityId::new(1)]
        );
        let response = bus.dispatch(&CommandRequest::new("explode"), &mut context);
        assert!(!response.success);
        assert!(bus.available_commands().any(|name| *name == "send_backward"));
    }
}
