use std::path::Path;
use std::sync::Arc;

use chimera_core::prelude::*;
use chimera_mvc::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;

// ==================== 数据模型 ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct User {
    id: u32,
    name: String,
    email: String,
}

/// 从请求体绑定的模型，role 不接受客户端输入
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UserForm {
    name: String,
    email: String,
    role: String,
}

impl RequestModel for UserForm {
    fn bindable_fields() -> &'static [&'static str] {
        &["name", "email"]
    }
}

// ==================== 服务层 ====================

struct UserService {
    users: RwLock<Vec<User>>,
}

impl UserService {
    fn new() -> Self {
        Self {
            users: RwLock::new(vec![
                User {
                    id: 1,
                    name: "Alice".to_string(),
                    email: "alice@example.com".to_string(),
                },
                User {
                    id: 2,
                    name: "Bob".to_string(),
                    email: "bob@example.com".to_string(),
                },
            ]),
        }
    }

    async fn list(&self) -> Vec<User> {
        self.users.read().await.clone()
    }

    async fn find(&self, id: u32) -> Option<User> {
        self.users.read().await.iter().find(|u| u.id == id).cloned()
    }

    async fn create(&self, form: &UserForm) -> User {
        let mut users = self.users.write().await;
        let id = users.iter().map(|u| u.id).max().unwrap_or(0) + 1;
        let user = User {
            id,
            name: form.name.clone(),
            email: form.email.clone(),
        };
        users.push(user.clone());
        user
    }

    async fn update(&self, id: u32, form: &UserForm) -> Option<User> {
        let mut users = self.users.write().await;
        let user = users.iter_mut().find(|u| u.id == id)?;
        user.name = form.name.clone();
        user.email = form.email.clone();
        Some(user.clone())
    }

    async fn remove(&self, id: u32) -> bool {
        let mut users = self.users.write().await;
        let before = users.len();
        users.retain(|u| u.id != id);
        users.len() != before
    }
}

// ==================== 控制器 ====================

struct UserController {
    service: Arc<UserService>,
}

fn user_id(args: &Args, index: usize) -> anyhow::Result<u32> {
    let id = args
        .number(index)
        .ok_or_else(|| WebError::bad_request("missing user id"))?;
    if id < 0.0 || id.fract() != 0.0 || id > f64::from(u32::MAX) {
        return Err(WebError::bad_request(format!("invalid user id: {}", id)).into());
    }
    Ok(id as u32)
}

impl UserController {
    async fn list(self: Arc<Self>, _args: Args) -> anyhow::Result<Reply> {
        Reply::json(&self.service.list().await)
    }

    async fn find(self: Arc<Self>, args: Args) -> anyhow::Result<Reply> {
        let id = user_id(&args, 0)?;
        match self.service.find(id).await {
            Some(user) => Reply::json(&user),
            None => Err(WebError::NotFound(format!("user {} not found", id)).into()),
        }
    }

    async fn create(self: Arc<Self>, args: Args) -> anyhow::Result<Reply> {
        let form = args
            .model::<UserForm>(0)
            .ok_or_else(|| WebError::bad_request("missing user form"))?;
        let user = self.service.create(&form).await;
        tracing::info!(user_id = user.id, role = %form.role, "User created");
        Ok(ActionResult::json_with_status(serde_json::to_value(user)?, StatusCode::CREATED).into())
    }

    async fn update(self: Arc<Self>, args: Args) -> anyhow::Result<Reply> {
        let form = args
            .model::<UserForm>(0)
            .ok_or_else(|| WebError::bad_request("missing user form"))?;
        let id = user_id(&args, 1)?;
        match self.service.update(id, &form).await {
            Some(user) => Reply::json(&user),
            None => Err(WebError::NotFound(format!("user {} not found", id)).into()),
        }
    }

    async fn remove(self: Arc<Self>, args: Args) -> anyhow::Result<Reply> {
        let id = user_id(&args, 0)?;
        if self.service.remove(id).await {
            Ok(Reply::Empty)
        } else {
            Err(WebError::NotFound(format!("user {} not found", id)).into())
        }
    }
}

struct InfoController {
    name: String,
}

impl InfoController {
    async fn info(self: Arc<Self>, _args: Args) -> anyhow::Result<Reply> {
        Ok(Reply::Object(json!({
            "name": self.name,
            "framework": "chimera-mvc",
        })))
    }

    async fn health(self: Arc<Self>, _args: Args) -> anyhow::Result<Reply> {
        Ok("OK".into())
    }

    async fn docs(self: Arc<Self>, _args: Args) -> anyhow::Result<Reply> {
        Ok(ActionResult::redirect("/api/info").into())
    }
}

// ==================== 授权 ====================

struct TokenAuthorization {
    expected: String,
}

#[async_trait]
impl Authorization for TokenAuthorization {
    async fn is_auth(&self, ctx: &RequestContext) -> anyhow::Result<bool> {
        Ok(ctx.header("authorization") == Some(self.expected.as_str()))
    }
}

// ==================== 启动 ====================

fn load_environment() -> ApplicationResult<Environment> {
    let config_file = if Path::new("demos/mvc-demo/application.toml").exists() {
        "demos/mvc-demo/application.toml"
    } else {
        "application.toml"
    };

    let environment = Environment::new();
    if Path::new(config_file).exists() {
        environment.add_property_source(Box::new(TomlPropertySource::from_file(config_file)?));
    }
    environment.add_property_source(Box::new(EnvironmentPropertySource::new("APP_")));
    Ok(environment)
}

#[tokio::main]
async fn main() -> ApplicationResult<()> {
    let environment = load_environment()?;
    LoggingConfig::from_environment(&environment).init()?;

    let token = environment.get_string_or("app.token", "demo-token");
    let context = Arc::new(ApplicationContext::with_environment(Arc::new(environment)));

    let service = Arc::new(UserService::new());
    context.register_instance("userService", Arc::clone(&service))?;
    context.register_instance("userController", UserController { service })?;
    context.register_instance(
        "infoController",
        InfoController {
            name: "MvcDemo".to_string(),
        },
    )?;
    context.register_prototype("userForm", || async { Ok(UserForm {
        role: "member".to_string(),
        ..Default::default()
    }) })?;

    let users = ControllerMetadata::new("userController", "/api/users")
        .get("", "list")
        .get("/:id", "find")
        .post("", "create")
        .put("/:id", "update")
        .delete("/:id", "remove")
        .require_auth("create")
        .require_auth("update")
        .require_auth("remove")
        .controller_cors(CorsMetadata::new().allow_headers(["Authorization", "Content-Type"]))
        .cors(
            "remove",
            CorsMetadata::new()
                .allow_methods(["DELETE"])
                .allow_headers(["Authorization"])
                .max_age(60),
        );

    let info = ControllerMetadata::new("infoController", "/api")
        .get("/info", "info")
        .route(RouteMetadata::new(RouteMethod::Get, "/health", "health").with_content_type("text/plain"))
        .get("/docs", "docs");

    let app = WebApplication::builder(context)
        .controller(users)
        .controller(info)
        .handler("userController", "list", vec![], UserController::list)
        .handler("userController", "find", vec![ParamType::Number], UserController::find)
        .handler(
            "userController",
            "create",
            vec![ParamType::model::<UserForm>("userForm")],
            UserController::create,
        )
        .handler(
            "userController",
            "update",
            vec![ParamType::model::<UserForm>("userForm"), ParamType::Number],
            UserController::update,
        )
        .handler("userController", "remove", vec![ParamType::Number], UserController::remove)
        .handler("infoController", "info", vec![], InfoController::info)
        .handler("infoController", "health", vec![], InfoController::health)
        .handler("infoController", "docs", vec![], InfoController::docs)
        .authorization(Arc::new(TokenAuthorization {
            expected: format!("Bearer {}", token),
        }))
        .build()
        .await?;

    println!("\n📋 可用的 API 端点：\n");
    println!("  GET    /api/info              - 应用信息");
    println!("  GET    /api/health            - 健康检查");
    println!("  GET    /api/docs              - 重定向到 /api/info");
    println!("  GET    /api/users             - 用户列表");
    println!("  GET    /api/users/:id         - 获取单个用户");
    println!("  POST   /api/users             - 创建用户（需要 Authorization: Bearer <token>）");
    println!("  PUT    /api/users/:id         - 更新用户（需要授权）");
    println!("  DELETE /api/users/:id         - 删除用户（需要授权）\n");

    app.run().await
}
