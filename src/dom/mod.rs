//! # 页面模型模块（dom）
//!
//! ## 设计思路
//!
//! 内容上下文观察到的页面以显式数据结构建模：文档、元素节点、图片节点
//! （含加载状态与像素数据）、结构化数据块、变更订阅。检测与采集层只依赖
//! 这一层的语义，不关心宿主环境如何渲染。
//!
//! 与真实页面一致的关键语义：
//! - 节点新增会以"批次"形式推送给所有变更订阅者，按发生顺序交付。
//! - 图片有 `Pending / Loaded / Failed` 三态，未加载完成前像素不可读。
//! - 跨源且无许可头的图片像素携带"不可回读"标记，读取在画布编码层
//!   以类型化错误暴露（见 `acquire::canvas`）。
//!
//! ## 实现思路
//!
//! - 节点为 `Arc` 句柄，父链为 `Weak`，归属权在文档树，页面卸载即整体释放。
//! - 加载状态用 `tokio::sync::watch` 广播，等待方挂起到状态变更。
//! - 变更订阅用 `mpsc::unbounded`，关闭的订阅者在下次推送时被剪除。
//! - 锁中毒按恢复数据继续使用，不向上传播 panic。

pub mod selector;

pub use selector::{Selector, SelectorError};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use image::RgbaImage;
use tokio::sync::{mpsc, watch};

/// 节点共享句柄。
pub type NodeHandle = Arc<Node>;

/// 页面模型错误。
#[derive(Debug, thiserror::Error)]
pub enum DomError {
    #[error("节点不是图片元素")]
    NotAnImage,

    #[error("图片加载失败：{0}")]
    LoadFailed(String),
}

/// 图片加载状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageLoadState {
    Pending,
    Loaded,
    Failed,
}

fn read_guard<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_guard<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn mutex_guard<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 图片节点附加数据。
pub struct ImageData {
    src: String,
    alt: String,
    rendered_size: (u32, u32),
    natural_size: RwLock<Option<(u32, u32)>>,
    cors_clean: bool,
    load_tx: watch::Sender<ImageLoadState>,
    /// 常驻接收端，保证 `load_tx.send` 在无外部订阅者时仍保留最新状态。
    _load_rx: watch::Receiver<ImageLoadState>,
    pixels: Mutex<Option<RgbaImage>>,
}

impl ImageData {
    /// 解析后的图片地址（去重键）。
    pub fn src(&self) -> &str {
        &self.src
    }

    pub fn alt(&self) -> &str {
        &self.alt
    }

    /// 自然尺寸，仅在加载完成后可用。
    pub fn natural_size(&self) -> Option<(u32, u32)> {
        *read_guard(&self.natural_size)
    }

    /// 布局尺寸（渲染宽高）。
    pub fn rendered_size(&self) -> (u32, u32) {
        self.rendered_size
    }

    /// 像素是否可回读（同源或带许可跨源头）。
    pub fn cors_clean(&self) -> bool {
        self.cors_clean
    }

    pub fn load_state(&self) -> ImageLoadState {
        *self.load_tx.borrow()
    }

    /// 取像素快照。未加载完成时为 `None`。
    pub fn pixels(&self) -> Option<RgbaImage> {
        mutex_guard(&self.pixels).clone()
    }
}

/// 页面元素节点。
///
/// 属性表为构造期快照；图片的加载状态与像素是节点上唯一的可变部分。
pub struct Node {
    tag: String,
    id: Option<String>,
    classes: Vec<String>,
    attrs: HashMap<String, String>,
    image: Option<ImageData>,
    parent: RwLock<Weak<Node>>,
    children: RwLock<Vec<NodeHandle>>,
}

impl Node {
    /// 构造普通元素节点。
    pub fn element(tag: &str) -> NodeBuilder {
        NodeBuilder::new(tag)
    }

    /// 构造图片节点。
    pub fn image(src: &str) -> ImageNodeBuilder {
        ImageNodeBuilder::new(src)
    }

    /// 建立父子关系。子节点从属于父节点，父链为弱引用。
    pub fn append_child(parent: &NodeHandle, child: &NodeHandle) {
        *write_guard(&child.parent) = Arc::downgrade(parent);
        write_guard(&parent.children).push(Arc::clone(child));
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn parent(&self) -> Option<NodeHandle> {
        read_guard(&self.parent).upgrade()
    }

    pub fn children(&self) -> Vec<NodeHandle> {
        read_guard(&self.children).clone()
    }

    pub fn is_image(&self) -> bool {
        self.image.is_some()
    }

    pub fn image_data(&self) -> Option<&ImageData> {
        self.image.as_ref()
    }

    /// 图片加载完成：记录自然尺寸与像素，并唤醒所有等待者。
    pub fn complete_load(&self, pixels: RgbaImage) {
        if let Some(image) = &self.image {
            *write_guard(&image.natural_size) = Some((pixels.width(), pixels.height()));
            *mutex_guard(&image.pixels) = Some(pixels);
            let _ = image.load_tx.send(ImageLoadState::Loaded);
        }
    }

    /// 图片加载失败（对应 error 事件）。
    pub fn fail_load(&self) {
        if let Some(image) = &self.image {
            let _ = image.load_tx.send(ImageLoadState::Failed);
        }
    }

    /// 挂起直到图片加载完成。
    ///
    /// 非图片节点与加载失败均返回错误；像素在 `Ok` 之后可读。
    pub async fn wait_until_loaded(&self) -> Result<(), DomError> {
        let image = self.image.as_ref().ok_or(DomError::NotAnImage)?;
        let mut rx = image.load_tx.subscribe();

        loop {
            match *rx.borrow_and_update() {
                ImageLoadState::Loaded => return Ok(()),
                ImageLoadState::Failed => {
                    return Err(DomError::LoadFailed(image.src.clone()));
                }
                ImageLoadState::Pending => {}
            }

            if rx.changed().await.is_err() {
                return Err(DomError::LoadFailed(image.src.clone()));
            }
        }
    }
}

/// 普通元素节点构造器。
pub struct NodeBuilder {
    tag: String,
    id: Option<String>,
    classes: Vec<String>,
    attrs: HashMap<String, String>,
}

impl NodeBuilder {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_lowercase(),
            id: None,
            classes: Vec::new(),
            attrs: HashMap::new(),
        }
    }

    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self.attrs.insert("id".to_string(), id.to_string());
        self
    }

    /// 设置 class 属性（空白分隔的多 class 串）。
    pub fn class(mut self, classes: &str) -> Self {
        self.classes = classes.split_whitespace().map(|c| c.to_string()).collect();
        self.attrs.insert("class".to_string(), classes.to_string());
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> NodeHandle {
        Arc::new(Node {
            tag: self.tag,
            id: self.id,
            classes: self.classes,
            attrs: self.attrs,
            image: None,
            parent: RwLock::new(Weak::new()),
            children: RwLock::new(Vec::new()),
        })
    }
}

/// 图片节点构造器。
///
/// 默认 `Pending` 状态，可用 `loaded` 直接构造已加载图片（测试常用）。
pub struct ImageNodeBuilder {
    src: String,
    alt: String,
    id: Option<String>,
    classes: Vec<String>,
    attrs: HashMap<String, String>,
    rendered_size: (u32, u32),
    natural_size: Option<(u32, u32)>,
    cors_clean: bool,
    initial_state: ImageLoadState,
    pixels: Option<RgbaImage>,
}

impl ImageNodeBuilder {
    fn new(src: &str) -> Self {
        let mut attrs = HashMap::new();
        attrs.insert("src".to_string(), src.to_string());

        Self {
            src: src.to_string(),
            alt: String::new(),
            id: None,
            classes: Vec::new(),
            attrs,
            rendered_size: (0, 0),
            natural_size: None,
            cors_clean: true,
            initial_state: ImageLoadState::Pending,
            pixels: None,
        }
    }

    pub fn alt(mut self, alt: &str) -> Self {
        self.alt = alt.to_string();
        self.attrs.insert("alt".to_string(), alt.to_string());
        self
    }

    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self.attrs.insert("id".to_string(), id.to_string());
        self
    }

    pub fn class(mut self, classes: &str) -> Self {
        self.classes = classes.split_whitespace().map(|c| c.to_string()).collect();
        self.attrs.insert("class".to_string(), classes.to_string());
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn rendered_size(mut self, width: u32, height: u32) -> Self {
        self.rendered_size = (width, height);
        self
    }

    /// 标记为跨源且无许可头：像素不可回读。
    pub fn tainted(mut self) -> Self {
        self.cors_clean = false;
        self
    }

    /// 以纯色像素构造"已加载"图片。
    pub fn loaded(mut self, width: u32, height: u32) -> Self {
        self.natural_size = Some((width, height));
        self.initial_state = ImageLoadState::Loaded;
        self.pixels = Some(RgbaImage::from_pixel(
            width.max(1),
            height.max(1),
            image::Rgba([180, 180, 180, 255]),
        ));
        self
    }

    pub fn build(self) -> NodeHandle {
        let (load_tx, load_rx) = watch::channel(self.initial_state);

        Arc::new(Node {
            tag: "img".to_string(),
            id: self.id,
            classes: self.classes,
            attrs: self.attrs,
            image: Some(ImageData {
                src: self.src,
                alt: self.alt,
                rendered_size: self.rendered_size,
                natural_size: RwLock::new(self.natural_size),
                cors_clean: self.cors_clean,
                load_tx,
                _load_rx: load_rx,
                pixels: Mutex::new(self.pixels),
            }),
            parent: RwLock::new(Weak::new()),
            children: RwLock::new(Vec::new()),
        })
    }
}

/// 一批新增节点（按发生顺序）。
#[derive(Clone)]
pub struct MutationBatch {
    pub added: Vec<NodeHandle>,
}

/// 页面文档。
///
/// 持有元素树、结构化数据块与变更订阅者，`Clone` 共享同一份内部状态。
#[derive(Clone)]
pub struct Document {
    inner: Arc<DocumentInner>,
}

struct DocumentInner {
    url: String,
    title: String,
    hostname: String,
    body: NodeHandle,
    structured_data: Vec<String>,
    observers: Mutex<Vec<mpsc::UnboundedSender<MutationBatch>>>,
}

impl Document {
    pub fn builder(url: &str) -> DocumentBuilder {
        DocumentBuilder::new(url)
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn title(&self) -> &str {
        &self.inner.title
    }

    pub fn hostname(&self) -> &str {
        &self.inner.hostname
    }

    pub fn body(&self) -> NodeHandle {
        Arc::clone(&self.inner.body)
    }

    /// 嵌入的结构化数据块（原始 JSON 文本）。
    pub fn structured_data(&self) -> &[String] {
        &self.inner.structured_data
    }

    /// 订阅节点新增批次。丢弃接收端即取消订阅。
    pub fn observe(&self) -> mpsc::UnboundedReceiver<MutationBatch> {
        let (tx, rx) = mpsc::unbounded_channel();
        mutex_guard(&self.inner.observers).push(tx);
        rx
    }

    /// 将节点挂到 body 下，并通知订阅者。
    pub fn append(&self, node: &NodeHandle) {
        self.append_to(&self.inner.body, node);
    }

    /// 将节点挂到指定父节点下，并通知订阅者。
    pub fn append_to(&self, parent: &NodeHandle, node: &NodeHandle) {
        Node::append_child(parent, node);
        self.notify(MutationBatch {
            added: vec![Arc::clone(node)],
        });
    }

    /// 批量挂载：一次变更回调对应一批新增节点。
    pub fn append_batch(&self, nodes: &[NodeHandle]) {
        for node in nodes {
            Node::append_child(&self.inner.body, node);
        }
        self.notify(MutationBatch {
            added: nodes.to_vec(),
        });
    }

    fn notify(&self, batch: MutationBatch) {
        let mut observers = mutex_guard(&self.inner.observers);
        observers.retain(|tx| tx.send(batch.clone()).is_ok());
    }

    /// 深度优先遍历全树。
    pub fn walk(&self, visit: &mut dyn FnMut(&NodeHandle)) {
        walk_node(&self.inner.body, visit);
    }

    /// 收集文档中的全部图片节点。
    pub fn images(&self) -> Vec<NodeHandle> {
        let mut images = Vec::new();
        self.walk(&mut |node| {
            if node.is_image() {
                images.push(Arc::clone(node));
            }
        });
        images
    }

    /// 返回命中选择器的全部节点。
    pub fn query_selector_all(&self, selector: &Selector) -> Vec<NodeHandle> {
        let mut hits = Vec::new();
        self.walk(&mut |node| {
            if selector.matches(node) {
                hits.push(Arc::clone(node));
            }
        });
        hits
    }

    /// 任一选择器命中任一节点即为真。无法解析的选择器按不命中跳过。
    pub fn matches_any(&self, selectors: &[&str]) -> bool {
        selectors.iter().any(|raw| match Selector::parse(raw) {
            Ok(selector) => !self.query_selector_all(&selector).is_empty(),
            Err(_) => false,
        })
    }
}

fn walk_node(node: &NodeHandle, visit: &mut dyn FnMut(&NodeHandle)) {
    visit(node);
    for child in node.children() {
        walk_node(&child, visit);
    }
}

/// 收集某节点子树内的全部图片（含自身）。
pub fn collect_images(node: &NodeHandle) -> Vec<NodeHandle> {
    let mut images = Vec::new();
    walk_node(node, &mut |n| {
        if n.is_image() {
            images.push(Arc::clone(n));
        }
    });
    images
}

/// 文档构造器。
pub struct DocumentBuilder {
    url: String,
    title: String,
    structured_data: Vec<String>,
}

impl DocumentBuilder {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            title: String::new(),
            structured_data: Vec::new(),
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    /// 追加一段结构化数据（JSON-LD 原文，允许畸形）。
    pub fn structured_data_block(mut self, json: &str) -> Self {
        self.structured_data.push(json.to_string());
        self
    }

    pub fn build(self) -> Document {
        let hostname = url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_default();

        Document {
            inner: Arc::new(DocumentInner {
                url: self.url,
                title: self.title,
                hostname,
                body: Node::element("body").build(),
                structured_data: self.structured_data,
                observers: Mutex::new(Vec::new()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_builder_extracts_hostname() {
        let doc = Document::builder("https://shop.example.com/dress/123").build();
        assert_eq!(doc.hostname(), "shop.example.com");
    }

    #[test]
    fn append_notifies_observers_in_order() {
        let doc = Document::builder("https://shop.example.com/").build();
        let mut rx = doc.observe();

        let first = Node::image("https://shop.example.com/a.jpg").build();
        let second = Node::image("https://shop.example.com/b.jpg").build();
        doc.append(&first);
        doc.append(&second);

        let batch = rx.try_recv().expect("first batch should be delivered");
        assert_eq!(batch.added.len(), 1);
        assert_eq!(
            batch.added[0].image_data().map(|i| i.src().to_string()),
            Some("https://shop.example.com/a.jpg".to_string())
        );

        let batch = rx.try_recv().expect("second batch should be delivered");
        assert_eq!(
            batch.added[0].image_data().map(|i| i.src().to_string()),
            Some("https://shop.example.com/b.jpg".to_string())
        );
    }

    #[test]
    fn dropped_observer_is_pruned() {
        let doc = Document::builder("https://shop.example.com/").build();
        let rx = doc.observe();
        drop(rx);

        // 推送时剪除已关闭的订阅者，不应 panic
        doc.append(&Node::image("https://shop.example.com/a.jpg").build());
    }

    #[test]
    fn images_walks_nested_containers() {
        let doc = Document::builder("https://shop.example.com/").build();
        let gallery = Node::element("div").class("gallery").build();
        let img = Node::image("https://shop.example.com/a.jpg").build();

        doc.append(&gallery);
        doc.append_to(&gallery, &img);

        assert_eq!(doc.images().len(), 1);
    }

    #[tokio::test]
    async fn wait_until_loaded_wakes_on_completion() {
        let node = Node::image("https://shop.example.com/slow.jpg").build();
        let waiter = Arc::clone(&node);

        let handle = tokio::spawn(async move { waiter.wait_until_loaded().await });

        tokio::task::yield_now().await;
        node.complete_load(RgbaImage::from_pixel(4, 4, image::Rgba([0, 0, 0, 255])));

        handle
            .await
            .expect("waiter task should not panic")
            .expect("load should complete successfully");
        assert_eq!(node.image_data().and_then(|i| i.natural_size()), Some((4, 4)));
    }

    #[tokio::test]
    async fn wait_until_loaded_reports_failure() {
        let node = Node::image("https://shop.example.com/broken.jpg").build();
        node.fail_load();

        let result = node.wait_until_loaded().await;
        assert!(matches!(result, Err(DomError::LoadFailed(_))));
    }
}
